//! Single-event lookups by id or by addressable coordinate.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    engine::Engine,
    event::Event,
    filter::Filter,
    reference::{is_hex_id, Coordinate},
    source::{Deadline, EventSource, SourceError},
};

/// Per-attempt timeout for a single lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Extra attempts after a failed lookup.
pub const LOOKUP_RETRIES: usize = 2;

impl<S: EventSource> Engine<S> {
    /// Fetch one event by id from the read relays. Malformed ids return
    /// `None` without touching the network.
    pub async fn fetch_event(&self, id: &str, cancel: &CancellationToken) -> Option<Event> {
        if !is_hex_id(id) {
            debug!(id, "not an event id");
            return None;
        }
        let filter = Filter::new().ids([id.to_string()]).limit(1);
        let events = self.lookup(filter, cancel).await?;
        events.into_iter().find(|ev| ev.id == id)
    }

    /// Fetch the newest version of an addressable event.
    pub async fn fetch_addressable(
        &self,
        coord: &Coordinate,
        cancel: &CancellationToken,
    ) -> Option<Event> {
        if !is_hex_id(&coord.pubkey) {
            debug!(coordinate = %coord, "coordinate author is not a hex key");
            return None;
        }
        let filter = Filter::new()
            .kinds([coord.kind])
            .author(coord.pubkey.clone())
            .tag("d", coord.identifier.clone())
            .limit(1);
        let events = self.lookup(filter, cancel).await?;
        events
            .into_iter()
            .filter(|ev| Coordinate::of_event(ev).as_ref() == Some(coord))
            .max_by_key(|ev| ev.created_at)
    }

    async fn lookup(&self, filter: Filter, cancel: &CancellationToken) -> Option<Vec<Event>> {
        let relays = self.relays.snapshot().read_urls();
        let filters = [filter];
        for attempt in 0..=LOOKUP_RETRIES {
            let deadline = Deadline::new(cancel, LOOKUP_TIMEOUT);
            match deadline.run(self.source.query(&relays, &filters)).await {
                Ok(events) => return Some(events),
                Err(SourceError::Cancelled) => return None,
                Err(e) => warn!(attempt, error = %e, "lookup failed"),
            }
        }
        None
    }
}
