//! In-memory [`EventSource`] holding a fixed set of events per relay URL.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    event::Event,
    filter::Filter,
    source::{EventSource, SourceError},
};

/// Relay contents keyed by URL, with optional failures and delays.
///
/// Every query is recorded so callers can inspect which relays were asked for
/// what. Unknown URLs behave like reachable, empty relays.
#[derive(Default)]
pub struct MemorySource {
    relays: HashMap<String, Vec<Event>>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    log: Mutex<Vec<(Vec<String>, Vec<Filter>)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add events served by `url`.
    pub fn with_relay(mut self, url: &str, events: Vec<Event>) -> Self {
        self.relays.entry(url.to_string()).or_default().extend(events);
        self
    }

    /// Make every query touching `url` fail for that relay.
    pub fn with_failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Delay answers from `url`.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Every query issued so far as `(relays, filters)`.
    pub fn queries(&self) -> Vec<(Vec<String>, Vec<Filter>)> {
        self.log.lock().clone()
    }

    /// Distinct relay URLs that have been queried.
    pub fn queried_urls(&self) -> HashSet<String> {
        self.log
            .lock()
            .iter()
            .flat_map(|(relays, _)| relays.iter().cloned())
            .collect()
    }

    /// Events a single relay returns for `filters`, newest first, honouring
    /// each filter's `limit`.
    fn answer(&self, url: &str, filters: &[Filter]) -> Vec<Event> {
        let Some(stored) = self.relays.get(url) else {
            return vec![];
        };
        let mut out: Vec<Event> = vec![];
        for filter in filters {
            let mut hits: Vec<&Event> = stored.iter().filter(|ev| filter.matches(ev)).collect();
            hits.sort_by_key(|ev| std::cmp::Reverse(ev.created_at));
            if let Some(limit) = filter.limit {
                hits.truncate(limit);
            }
            for ev in hits {
                if !out.iter().any(|o| o.id == ev.id) {
                    out.push(ev.clone());
                }
            }
        }
        out
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn query(&self, relays: &[String], filters: &[Filter]) -> Result<Vec<Event>, SourceError> {
        self.log.lock().push((relays.to_vec(), filters.to_vec()));
        if relays.is_empty() {
            return Err(SourceError::NoRelays);
        }
        let delay = relays
            .iter()
            .filter_map(|url| self.delays.get(url))
            .max()
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut out: Vec<Event> = vec![];
        let mut answered = false;
        for url in relays {
            if self.failing.contains(url) {
                continue;
            }
            answered = true;
            for ev in self.answer(url, filters) {
                if !out.iter().any(|o| o.id == ev.id) {
                    out.push(ev);
                }
            }
        }
        if !answered {
            return Err(SourceError::Unreachable(relays.join(",")));
        }
        Ok(out)
    }
}
