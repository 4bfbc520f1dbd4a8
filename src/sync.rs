//! One-shot reconciliation of the working relay list with the user's NIP-65
//! relay list event.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    event::{Event, KIND_RELAY_LIST},
    filter::Filter,
    reference::valid_relay_url,
    relays::{Provenance, Relay, RelayList, SharedRelays, FALLBACK_RELAY_URLS},
    source::{Deadline, EventSource},
};

pub const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the relay list described by `ev`, or `None` when it should not
/// replace `current`: it is not newer, or it lists no usable `r` tags.
///
/// Relays from the event are the user's own. Discovery relays and, unless
/// `current.fallbacks_disabled`, fallback relays are appended read-only when
/// not already listed.
pub fn reconcile(current: &RelayList, ev: &Event, discovery: &[String]) -> Option<RelayList> {
    if ev.kind != KIND_RELAY_LIST || ev.created_at <= current.updated_at {
        return None;
    }
    let mut relays: Vec<Relay> = vec![];
    for tag in ev.tags_named("r") {
        let Some(url) = tag.get(1).filter(|u| valid_relay_url(u)) else {
            continue;
        };
        if relays.iter().any(|r| r.url == url) {
            continue;
        }
        let marker = tag.get(2);
        relays.push(Relay {
            url: url.to_string(),
            read: matches!(marker, None | Some("read")),
            write: matches!(marker, None | Some("write")),
            source: Provenance::User,
        });
    }
    if relays.is_empty() {
        return None;
    }

    let mut list = RelayList {
        relays,
        updated_at: ev.created_at,
        fallbacks_disabled: current.fallbacks_disabled,
    };
    for url in discovery {
        if !list.contains(url) {
            list.relays.push(Relay::read_only(url.clone(), Provenance::Discovery));
        }
    }
    if !list.fallbacks_disabled {
        for url in FALLBACK_RELAY_URLS {
            if !list.contains(url) {
                list.relays.push(Relay::read_only(*url, Provenance::Fallback));
            }
        }
    }
    Some(list)
}

/// Fetch `pubkey`'s latest relay list from the current read relays and swap
/// it in when it is newer. Returns the installed list, if any.
pub async fn sync_relay_list<S: EventSource + ?Sized>(
    source: &S,
    relays: &SharedRelays,
    discovery: &[String],
    pubkey: &str,
    cancel: &CancellationToken,
) -> Option<Arc<RelayList>> {
    let current = relays.snapshot();
    let filter = Filter::new()
        .kinds([KIND_RELAY_LIST])
        .author(pubkey)
        .limit(1);
    let deadline = Deadline::new(cancel, SYNC_TIMEOUT);
    let events = match deadline
        .run(source.query(&current.read_urls(), &[filter]))
        .await
    {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "relay list sync failed");
            return None;
        }
    };
    let newest = events
        .iter()
        .filter(|ev| ev.pubkey == pubkey)
        .max_by_key(|ev| ev.created_at)?;
    let Some(list) = reconcile(&current, newest, discovery) else {
        debug!(created_at = newest.created_at, "relay list not newer, kept current");
        return None;
    };
    info!(relays = list.relays.len(), updated_at = list.updated_at, "relay list synced");
    relays.replace(list);
    Some(relays.snapshot())
}
