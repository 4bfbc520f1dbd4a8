//! Lookmark aggregation: discover 👀 notes and reactions across relays,
//! resolve what they point at and group them by target.
//!
//! One page runs as:
//!
//! 1. a NIP-50 search for 👀 notes on every discovery relay, each relay on its
//!    own so a slow or dead relay only loses its own results;
//! 2. concurrently, a kind 7 scan on the read relays;
//! 3. a plain kind 1 query on the read relays when search produced nothing;
//! 4. classification, target extraction and dedupe;
//! 5. target lookup on the read relays, then on capped hint relays plus the
//!    discovery relays for whatever is still missing;
//! 6. grouping by target, unresolved targets included.
//!
//! Every query of a page shares one [`Deadline`].

use std::{
    collections::{HashMap, HashSet},
    slice,
    sync::Arc,
    time::Duration,
};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheKey, Cached, LookmarkCache},
    classify::{classify, has_eyes, LookmarkType, EYES},
    event::{Event, KIND_NOTE, KIND_REACTION},
    filter::Filter,
    reference::{extract_target, is_hex_id, Coordinate, Target, TargetRef},
    relays::{SharedRelays, DISCOVERY_RELAY_URLS},
    source::{Deadline, EventSource, SourceError},
};

/// Upper bound on hint relays contacted while resolving missing targets.
pub const MAX_HINT_RELAYS: usize = 5;

/// Page size and per-page timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub page_size: usize,
    pub timeout: Duration,
}

impl Profile {
    pub const DESKTOP: Profile = Profile {
        page_size: 100,
        timeout: Duration::from_secs(10),
    };

    /// Smaller pages and a longer timeout for slow connections.
    pub const MOBILE: Profile = Profile {
        page_size: 50,
        timeout: Duration::from_secs(20),
    };
}

impl Default for Profile {
    fn default() -> Self {
        Self::DESKTOP
    }
}

/// A single lookmark event and how it was expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookmark {
    pub event: Event,
    #[serde(rename = "type")]
    pub kind: LookmarkType,
}

/// All lookmarks sharing one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookmarkedEvent {
    /// The target event, or `None` when no relay returned it.
    pub event: Option<Event>,
    /// Target id or coordinate, always present.
    pub target: TargetRef,
    /// Never empty.
    pub lookmarks: Vec<Lookmark>,
    /// Newest `created_at` among `lookmarks`.
    pub latest_lookmark_at: u64,
}

/// One page of grouped lookmarks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub groups: Vec<LookmarkedEvent>,
    /// `until` for the next page; `None` when this was the last one.
    pub next_cursor: Option<u64>,
}

/// The aggregation engine. Cheap to share behind an `Arc`.
pub struct Engine<S> {
    pub(crate) source: Arc<S>,
    pub(crate) relays: SharedRelays,
    pub(crate) discovery: Vec<String>,
    pub(crate) profile: Profile,
    cache: Option<Arc<dyn LookmarkCache>>,
}

impl<S: EventSource> Engine<S> {
    pub fn new(source: Arc<S>, relays: SharedRelays) -> Self {
        Self {
            source,
            relays,
            discovery: DISCOVERY_RELAY_URLS.iter().map(|s| s.to_string()).collect(),
            profile: Profile::default(),
            cache: None,
        }
    }

    /// Replace the discovery (NIP-50 search) relays.
    pub fn with_discovery(mut self, urls: Vec<String>) -> Self {
        self.discovery = urls;
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn LookmarkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn relays(&self) -> &SharedRelays {
        &self.relays
    }

    pub fn discovery(&self) -> &[String] {
        &self.discovery
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Cache key for `subject` under the current relay set.
    pub fn cache_key(&self, subject: Option<&str>) -> CacheKey {
        CacheKey::new(subject, self.relays.snapshot().fingerprint())
    }

    /// Cached first page for `subject`, stale or not.
    pub fn cached_first_page(&self, subject: Option<&str>) -> Option<Cached> {
        let cache = self.cache.as_ref()?;
        cache.get(&self.cache_key(subject))
    }

    /// Fetch one page of lookmarks, optionally restricted to those authored by
    /// `subject`, older than or at `cursor`.
    ///
    /// Never fails: unreachable relays contribute nothing, and the worst case
    /// is an empty page without a successor.
    pub async fn fetch_page(
        &self,
        subject: Option<&str>,
        cursor: Option<u64>,
        cancel: &CancellationToken,
    ) -> Page {
        let relays = self.relays.snapshot();
        let read = relays.read_urls();
        let deadline = Deadline::new(cancel, self.profile.timeout);
        let limit = self.profile.page_size;

        // NIP-50 relays misbehave when `search` is combined with `authors`, so
        // search broadly and filter by subject locally.
        let search = Filter::new()
            .kinds([KIND_NOTE])
            .search(EYES)
            .until(cursor)
            .limit(limit);
        let scan = [Filter::new()
            .kinds([KIND_REACTION])
            .author_opt(subject)
            .until(cursor)
            .limit(limit)];
        let (searched, reactions) = tokio::join!(
            self.settle(&deadline, &self.discovery, slice::from_ref(&search)),
            self.query_pool(&deadline, &read, &scan, "reaction scan"),
        );
        let search_results = merge_settled(searched, "discovery search");
        let reactions = dedupe_events(reactions);

        let mut fallback_notes = vec![];
        if search_results.is_empty() {
            let notes = [Filter::new()
                .kinds([KIND_NOTE])
                .author_opt(subject)
                .until(cursor)
                .limit(limit)];
            fallback_notes = self
                .query_pool(&deadline, &read, &notes, "NIP-01 fallback")
                .await;
            debug!(count = fallback_notes.len(), "discovery empty, used NIP-01 fallback");
        }

        let oldest = search_results
            .iter()
            .chain(&reactions)
            .chain(&fallback_notes)
            .map(|ev| ev.created_at)
            .min();
        let has_more = search_results.len() >= limit || reactions.len() >= limit;

        let notes = search_results
            .iter()
            .chain(fallback_notes.iter().filter(|ev| has_eyes(ev)))
            .filter(|ev| ev.kind == KIND_NOTE);
        let scanned = reactions.iter().filter(|ev| ev.kind == KIND_REACTION);
        let candidates = notes
            .chain(scanned)
            .filter(|ev| subject.map_or(true, |pk| ev.pubkey == pk));
        let lookmarks = collect_lookmarks(candidates);

        let wanted = Wanted::from_lookmarks(&lookmarks);
        let resolved = self.resolve(&deadline, &read, &wanted).await;

        let mut groups = group_by_target(lookmarks);
        for group in &mut groups {
            group.event = resolved.lookup(&group.target).cloned();
        }

        let next_cursor = if has_more {
            oldest.and_then(|t| t.checked_sub(1))
        } else {
            None
        };
        info!(
            subject = subject.unwrap_or("global"),
            groups = groups.len(),
            unresolved = groups.iter().filter(|g| g.event.is_none()).count(),
            next_cursor = ?next_cursor,
            "fetched lookmark page"
        );

        if cursor.is_none() && !groups.is_empty() {
            if let Some(cache) = &self.cache {
                cache.put(&CacheKey::new(subject, relays.fingerprint()), &groups);
            }
        }

        Page {
            groups,
            next_cursor,
        }
    }

    /// Look targets up on the read relays, then on hint and discovery relays.
    async fn resolve(&self, deadline: &Deadline, read: &[String], wanted: &Wanted) -> Resolved {
        let mut resolved = Resolved::default();
        let filters = wanted.filters(|_| true, |_| true);
        if !filters.is_empty() {
            let found = self
                .query_pool(deadline, read, &filters, "target lookup")
                .await;
            resolved.absorb(found, wanted);
        }

        let id_missing = |id: &String| !resolved.by_id.contains_key(id);
        let coord_missing = |c: &Coordinate| !resolved.by_coord.contains_key(&c.to_string());
        let missing = wanted.filters(id_missing, coord_missing);
        if missing.is_empty() {
            return resolved;
        }

        let hints = wanted
            .ids
            .iter()
            .filter(|id| id_missing(id))
            .flat_map(|id| wanted.hints.get(id).into_iter().flatten())
            .chain(
                wanted
                    .coords
                    .iter()
                    .filter(|(c, _)| coord_missing(c))
                    .filter_map(|(_, hint)| hint.as_ref()),
            )
            .map(String::as_str);
        let mut candidates = cap_hint_relays(hints, MAX_HINT_RELAYS);
        for url in &self.discovery {
            if !candidates.contains(url) {
                candidates.push(url.clone());
            }
        }
        if candidates.is_empty() {
            return resolved;
        }
        debug!(relays = candidates.len(), "resolving missing targets on fallback relays");
        let settled = self.settle(deadline, &candidates, &missing).await;
        resolved.absorb(merge_settled(settled, "fallback lookup"), wanted);
        resolved
    }

    /// Query each relay on its own and keep every outcome.
    pub(crate) async fn settle(
        &self,
        deadline: &Deadline,
        urls: &[String],
        filters: &[Filter],
    ) -> Vec<(String, Result<Vec<Event>, SourceError>)> {
        join_all(urls.iter().map(|url| async move {
            let res = deadline
                .run(self.source.query(slice::from_ref(url), filters))
                .await;
            (url.clone(), res)
        }))
        .await
    }

    /// Query every relay of the set on its own and merge what answered. A
    /// relay that fails or outlives the deadline contributes nothing.
    pub(crate) async fn query_pool(
        &self,
        deadline: &Deadline,
        relays: &[String],
        filters: &[Filter],
        what: &str,
    ) -> Vec<Event> {
        if relays.is_empty() {
            debug!(what, "no read relays configured");
            return vec![];
        }
        merge_settled(self.settle(deadline, relays, filters).await, what)
    }
}

/// Keep the first occurrence of every event id, preserving order.
pub fn dedupe_events(events: impl IntoIterator<Item = Event>) -> Vec<Event> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|ev| seen.insert(ev.id.clone()))
        .collect()
}

/// Merge the successful per-relay results, logging the failures.
pub(crate) fn merge_settled(
    settled: Vec<(String, Result<Vec<Event>, SourceError>)>,
    what: &str,
) -> Vec<Event> {
    let mut merged = vec![];
    for (url, res) in settled {
        match res {
            Ok(events) => merged.extend(events),
            Err(e) => warn!(relay = %url, what, error = %e, "relay failed"),
        }
    }
    dedupe_events(merged)
}

/// Classify candidates and pair each lookmark with its target. Events that
/// are not lookmarks, or whose target is malformed, are dropped.
pub(crate) fn collect_lookmarks<'a>(
    candidates: impl IntoIterator<Item = &'a Event>,
) -> Vec<(Lookmark, Target)> {
    let mut seen = HashSet::new();
    let mut out = vec![];
    for ev in candidates {
        let Some(kind) = classify(ev) else {
            continue;
        };
        let Some(target) = extract_target(ev, kind) else {
            debug!(id = %ev.id, "lookmark with malformed target dropped");
            continue;
        };
        if seen.insert(ev.id.clone()) {
            out.push((
                Lookmark {
                    event: ev.clone(),
                    kind,
                },
                target,
            ));
        }
    }
    out
}

/// Group lookmarks under their target, newest activity first. Every lookmark
/// lands in exactly one group; `event` is left empty for the caller to fill.
pub fn group_by_target(
    lookmarks: Vec<(Lookmark, Target)>,
) -> Vec<LookmarkedEvent> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<LookmarkedEvent> = vec![];
    for (lookmark, target) in lookmarks {
        let key = target.target.key();
        let at = lookmark.event.created_at;
        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                group.latest_lookmark_at = group.latest_lookmark_at.max(at);
                group.lookmarks.push(lookmark);
            }
            None => {
                index.insert(key, groups.len());
                groups.push(LookmarkedEvent {
                    event: None,
                    target: target.target,
                    lookmarks: vec![lookmark],
                    latest_lookmark_at: at,
                });
            }
        }
    }
    groups.sort_by(|a, b| b.latest_lookmark_at.cmp(&a.latest_lookmark_at));
    groups
}

/// Distinct hint relays in order of appearance, at most `cap` of them.
pub fn cap_hint_relays<'a>(hints: impl IntoIterator<Item = &'a str>, cap: usize) -> Vec<String> {
    let mut out: Vec<String> = vec![];
    for url in hints {
        if out.len() >= cap {
            break;
        }
        if !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    }
    out
}

/// Targets referenced by a page of lookmarks.
#[derive(Debug, Default)]
struct Wanted {
    /// Direct ids in order of first appearance.
    ids: Vec<String>,
    /// Valid relay hints per direct id.
    hints: HashMap<String, Vec<String>>,
    /// Coordinates with at most one hint each.
    coords: Vec<(Coordinate, Option<String>)>,
}

impl Wanted {
    fn from_lookmarks(lookmarks: &[(Lookmark, Target)]) -> Self {
        let mut wanted = Wanted::default();
        let mut coord_seen = HashSet::new();
        for (_, target) in lookmarks {
            match &target.target {
                TargetRef::Id(id) => {
                    let hints = match wanted.hints.get_mut(id) {
                        Some(hints) => hints,
                        None => {
                            wanted.ids.push(id.clone());
                            wanted.hints.entry(id.clone()).or_default()
                        }
                    };
                    if let Some(hint) = &target.hint {
                        if !hints.contains(hint) {
                            hints.push(hint.clone());
                        }
                    }
                }
                TargetRef::Address(coord) => {
                    if coord_seen.insert(coord.to_string()) {
                        wanted.coords.push((coord.clone(), target.hint.clone()));
                    } else if let Some((_, slot)) =
                        wanted.coords.iter_mut().find(|(c, _)| c == coord)
                    {
                        if slot.is_none() {
                            *slot = target.hint.clone();
                        }
                    }
                }
            }
        }
        wanted
    }

    /// Lookup filters for the ids and coordinates selected by the predicates.
    /// Coordinates whose author is not a hex key cannot be looked up.
    fn filters(
        &self,
        id_pred: impl Fn(&String) -> bool,
        coord_pred: impl Fn(&Coordinate) -> bool,
    ) -> Vec<Filter> {
        let mut filters = vec![];
        let ids: Vec<String> = self.ids.iter().filter(|id| id_pred(id)).cloned().collect();
        if !ids.is_empty() {
            filters.push(Filter::new().ids(ids));
        }
        for (coord, _) in &self.coords {
            if is_hex_id(&coord.pubkey) && coord_pred(coord) {
                filters.push(
                    Filter::new()
                        .kinds([coord.kind])
                        .author(coord.pubkey.clone())
                        .tag("d", coord.identifier.clone())
                        .limit(1),
                );
            }
        }
        filters
    }

    fn wants_id(&self, id: &str) -> bool {
        self.hints.contains_key(id)
    }

    fn wants_coord(&self, coord: &Coordinate) -> bool {
        self.coords.iter().any(|(c, _)| c == coord)
    }
}

/// Target events found so far.
#[derive(Debug, Default)]
struct Resolved {
    by_id: HashMap<String, Event>,
    by_coord: HashMap<String, Event>,
}

impl Resolved {
    /// Record events that answer a wanted target. The first event for an id
    /// wins; for a coordinate the newest version wins.
    fn absorb(&mut self, events: Vec<Event>, wanted: &Wanted) {
        for ev in events {
            if let Some(coord) = Coordinate::of_event(&ev) {
                if wanted.wants_coord(&coord) {
                    let key = coord.to_string();
                    let newer = self
                        .by_coord
                        .get(&key)
                        .map_or(true, |cur| ev.created_at > cur.created_at);
                    if newer {
                        self.by_coord.insert(key, ev.clone());
                    }
                }
            }
            if wanted.wants_id(&ev.id) && !self.by_id.contains_key(&ev.id) {
                self.by_id.insert(ev.id.clone(), ev);
            }
        }
    }

    fn lookup(&self, target: &TargetRef) -> Option<&Event> {
        match target {
            TargetRef::Id(id) => self.by_id.get(id),
            TargetRef::Address(coord) => self.by_coord.get(&coord.to_string()),
        }
    }
}
