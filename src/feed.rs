//! Infinite-list view over [`Engine::fetch_page`] with a cached first paint.

use std::{collections::HashSet, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cache::Cached,
    engine::{Engine, LookmarkedEvent, Page},
    source::EventSource,
};

/// What [`LookmarkFeed::items`] is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Nothing fetched and nothing cached.
    Loading,
    /// Showing cached data until the first live page lands.
    Placeholder { stale: bool },
    /// Showing live pages.
    Ready,
}

/// Pages of lookmarks for one subject (or the global feed).
pub struct LookmarkFeed<S> {
    engine: Arc<Engine<S>>,
    subject: Option<String>,
    pages: Vec<Page>,
    placeholder: Option<Cached>,
    cancel: CancellationToken,
}

impl<S: EventSource> LookmarkFeed<S> {
    /// Open a feed, seeding it from the cache when an entry exists for the
    /// subject under the current relay set.
    pub fn open(engine: Arc<Engine<S>>, subject: Option<&str>) -> Self {
        let placeholder = engine.cached_first_page(subject);
        if let Some(cached) = &placeholder {
            debug!(groups = cached.data.len(), stale = cached.is_stale, "seeded feed from cache");
        }
        Self {
            engine,
            subject: subject.map(str::to_string),
            pages: vec![],
            placeholder,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight and future fetches of this feed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> FeedStatus {
        match (&self.placeholder, self.pages.is_empty()) {
            (_, false) => FeedStatus::Ready,
            (Some(cached), true) => FeedStatus::Placeholder {
                stale: cached.is_stale,
            },
            (None, true) => FeedStatus::Loading,
        }
    }

    /// False once the last loaded page had no cursor.
    pub fn has_next_page(&self) -> bool {
        self.pages.last().map_or(true, |p| p.next_cursor.is_some())
    }

    /// Load the next page. Returns `None` when the feed is exhausted.
    pub async fn fetch_next_page(&mut self) -> Option<&Page> {
        if !self.has_next_page() {
            return None;
        }
        let cursor = self.pages.last().and_then(|p| p.next_cursor);
        let page = self
            .engine
            .fetch_page(self.subject.as_deref(), cursor, &self.cancel)
            .await;
        self.placeholder = None;
        self.pages.push(page);
        self.pages.last()
    }

    /// Reload from the first page, fetching as many pages as were loaded
    /// before (at least one). The old pages stay visible until the reload
    /// completes.
    pub async fn refetch(&mut self) {
        let want = self.pages.len().max(1);
        let mut fresh: Vec<Page> = Vec::with_capacity(want);
        let mut cursor = None;
        while fresh.len() < want {
            let page = self
                .engine
                .fetch_page(self.subject.as_deref(), cursor, &self.cancel)
                .await;
            cursor = page.next_cursor;
            fresh.push(page);
            if cursor.is_none() {
                break;
            }
        }
        self.placeholder = None;
        self.pages = fresh;
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Groups across all pages, first occurrence of each target wins. Falls
    /// back to the cached placeholder before the first live page.
    pub fn items(&self) -> Vec<LookmarkedEvent> {
        if self.pages.is_empty() {
            return self
                .placeholder
                .as_ref()
                .map(|c| c.data.clone())
                .unwrap_or_default();
        }
        let mut seen = HashSet::new();
        self.pages
            .iter()
            .flat_map(|p| p.groups.iter())
            .filter(|g| seen.insert(g.target.key()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{FileCache, LookmarkCache},
        classify::EYES,
        event::{Event, Tag, KIND_REACTION},
        memory::MemorySource,
        relays::{RelayList, SharedRelays},
    };
    use tempfile::TempDir;

    const RELAY: &str = "wss://relay.test";

    fn hex(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn reaction(id: String, target: char, at: u64) -> Event {
        Event {
            id,
            pubkey: hex('9'),
            kind: KIND_REACTION,
            created_at: at,
            tags: vec![Tag(vec!["e".into(), hex(target)])],
            content: EYES.into(),
            sig: String::new(),
        }
    }

    fn engine(events: Vec<Event>, page_size: usize, cache: Option<Arc<FileCache>>) -> Arc<Engine<MemorySource>> {
        let mut engine = Engine::new(
            Arc::new(MemorySource::new().with_relay(RELAY, events)),
            SharedRelays::new(RelayList::from_urls([RELAY])),
        )
        .with_discovery(vec![])
        .with_profile(crate::engine::Profile {
            page_size,
            timeout: std::time::Duration::from_secs(5),
        });
        if let Some(cache) = cache {
            engine = engine.with_cache(cache);
        }
        Arc::new(engine)
    }

    #[tokio::test]
    async fn pages_until_exhausted_and_dedupes_targets() {
        // three reactions to 'a' and one to 'b', two per page
        let events = vec![
            reaction(format!("{:064x}", 1), 'a', 40),
            reaction(format!("{:064x}", 2), 'b', 30),
            reaction(format!("{:064x}", 3), 'a', 20),
            reaction(format!("{:064x}", 4), 'a', 10),
        ];
        let mut feed = LookmarkFeed::open(engine(events, 2, None), None);
        assert_eq!(feed.status(), FeedStatus::Loading);
        assert!(feed.has_next_page());

        let first = feed.fetch_next_page().await.unwrap();
        assert_eq!(first.next_cursor, Some(29));
        assert_eq!(feed.status(), FeedStatus::Ready);

        let second = feed.fetch_next_page().await.unwrap();
        assert_eq!(second.next_cursor, Some(9));
        let third = feed.fetch_next_page().await.unwrap();
        assert!(third.groups.is_empty());
        assert!(!feed.has_next_page());
        assert!(feed.fetch_next_page().await.is_none());

        let keys: Vec<String> = feed.items().iter().map(|g| g.target.key()).collect();
        assert_eq!(keys, vec![hex('a'), hex('b')]);
        assert_eq!(feed.pages().len(), 3);
    }

    #[tokio::test]
    async fn cached_placeholder_then_live_data() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FileCache::new(dir.path().to_path_buf()));
        let engine = engine(vec![reaction(hex('1'), 'a', 5)], 10, Some(cache.clone()));

        let stale_group = LookmarkedEvent {
            event: None,
            target: crate::reference::TargetRef::Id(hex('c')),
            lookmarks: vec![],
            latest_lookmark_at: 1,
        };
        cache.put(&engine.cache_key(None), &[stale_group.clone()]);

        let mut feed = LookmarkFeed::open(engine.clone(), None);
        assert_eq!(feed.status(), FeedStatus::Placeholder { stale: false });
        assert_eq!(feed.items(), vec![stale_group]);

        feed.fetch_next_page().await.unwrap();
        assert_eq!(feed.status(), FeedStatus::Ready);
        assert_eq!(feed.items()[0].target.key(), hex('a'));
        // the live first page replaced the cache entry
        let cached = cache.get(&engine.cache_key(None)).unwrap();
        assert_eq!(cached.data[0].target.key(), hex('a'));
    }

    #[tokio::test]
    async fn refetch_reloads_loaded_pages() {
        let events = vec![
            reaction(format!("{:064x}", 1), 'a', 40),
            reaction(format!("{:064x}", 2), 'b', 30),
            reaction(format!("{:064x}", 3), 'c', 20),
        ];
        let mut feed = LookmarkFeed::open(engine(events, 1, None), None);
        feed.fetch_next_page().await;
        feed.fetch_next_page().await;
        feed.refetch().await;
        assert_eq!(feed.pages().len(), 2);
        assert_eq!(feed.items().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_feed_yields_empty_terminal_page() {
        let mut feed = LookmarkFeed::open(engine(vec![reaction(hex('1'), 'a', 5)], 10, None), None);
        feed.cancel();
        let page = feed.fetch_next_page().await.unwrap();
        assert!(page.groups.is_empty());
        assert_eq!(page.next_cursor, None);
    }
}
