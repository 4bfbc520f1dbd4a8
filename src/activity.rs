//! Lookmarks authored by one user, newest first.
//!
//! Queries regular relays by author and filters for 👀 locally instead of
//! combining `search` with `authors` on NIP-50 relays.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    classify::classify,
    engine::{dedupe_events, Engine, Lookmark},
    event::{KIND_NOTE, KIND_REACTION},
    filter::Filter,
    source::{Deadline, EventSource},
};

pub const ACTIVITY_PAGE_SIZE: usize = 100;
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub items: Vec<Lookmark>,
    pub next_cursor: Option<u64>,
}

impl<S: EventSource> Engine<S> {
    /// One page of lookmarks authored by `pubkey`, at or before `cursor`.
    pub async fn fetch_activity(
        &self,
        pubkey: &str,
        cursor: Option<u64>,
        cancel: &CancellationToken,
    ) -> ActivityPage {
        if pubkey.is_empty() {
            return ActivityPage::default();
        }
        let read = self.relays.snapshot().read_urls();
        let deadline = Deadline::new(cancel, ACTIVITY_TIMEOUT);
        let filters = [KIND_NOTE, KIND_REACTION].map(|kind| {
            Filter::new()
                .kinds([kind])
                .author(pubkey)
                .until(cursor)
                .limit(ACTIVITY_PAGE_SIZE)
        });
        let raw = dedupe_events(
            self.query_pool(&deadline, &read, &filters, "activity")
                .await,
        );

        let oldest = raw.iter().map(|ev| ev.created_at).min();
        let mut items: Vec<Lookmark> = raw
            .into_iter()
            .filter(|ev| ev.pubkey == pubkey)
            .filter_map(|ev| classify(&ev).map(|kind| Lookmark { event: ev, kind }))
            .collect();
        items.sort_by(|a, b| b.event.created_at.cmp(&a.event.created_at));

        ActivityPage {
            items,
            next_cursor: oldest.and_then(|t| t.checked_sub(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        classify::{LookmarkType, EYES},
        event::{Event, Tag},
        memory::MemorySource,
        relays::{RelayList, SharedRelays},
    };

    const RELAY: &str = "wss://relay.test";

    fn hex(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn ev(id: char, kind: u32, content: &str, tags: Vec<Tag>, at: u64) -> Event {
        Event {
            id: hex(id),
            pubkey: hex('a'),
            kind,
            created_at: at,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    fn e_tag() -> Tag {
        Tag(vec!["e".into(), hex('f')])
    }

    #[tokio::test]
    async fn lists_authored_lookmarks_newest_first() {
        let src = MemorySource::new().with_relay(
            RELAY,
            vec![
                ev('1', KIND_REACTION, EYES, vec![e_tag()], 10),
                ev('2', KIND_NOTE, "hi 👀", vec![e_tag()], 30),
                ev('3', KIND_NOTE, "no eyes", vec![e_tag()], 40),
                ev('4', KIND_NOTE, "👀 but standalone", vec![], 5),
                ev('5', KIND_NOTE, "quoting 👀", vec![Tag(vec!["q".into(), hex('f')])], 20),
            ],
        );
        let engine = Engine::new(Arc::new(src), SharedRelays::new(RelayList::from_urls([RELAY])));
        let page = engine
            .fetch_activity(&hex('a'), None, &CancellationToken::new())
            .await;
        let got: Vec<(String, LookmarkType)> = page
            .items
            .iter()
            .map(|l| (l.event.id.clone(), l.kind))
            .collect();
        assert_eq!(
            got,
            vec![
                (hex('2'), LookmarkType::Reply),
                (hex('5'), LookmarkType::Quote),
                (hex('1'), LookmarkType::Reaction),
            ]
        );
        // cursor follows the oldest raw record, lookmark or not
        assert_eq!(page.next_cursor, Some(4));
    }

    #[tokio::test]
    async fn empty_result_has_no_cursor() {
        let engine = Engine::new(
            Arc::new(MemorySource::new()),
            SharedRelays::new(RelayList::from_urls([RELAY])),
        );
        let page = engine
            .fetch_activity(&hex('a'), Some(100), &CancellationToken::new())
            .await;
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
    }
}
