//! Stale-while-revalidate cache for first pages of lookmarks.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::engine::LookmarkedEvent;

/// Entries older than this are returned flagged as stale.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Identifies one cached feed: the subject (or global) and the relay set it
/// was fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: Option<String>,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(subject: Option<&str>, fingerprint: impl Into<String>) -> Self {
        Self {
            subject: subject.map(str::to_string),
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.subject.as_deref().unwrap_or("global");
        write!(f, "{base}:{}", self.fingerprint)
    }
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub data: Vec<LookmarkedEvent>,
    /// Informational only; stale data is still fit for a first paint.
    pub is_stale: bool,
}

/// Cache capability. Implementations never fail towards the caller: storage
/// problems turn reads into misses and writes into no-ops.
pub trait LookmarkCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Cached>;

    fn put(&self, key: &CacheKey, data: &[LookmarkedEvent]);

    fn clear(&self);

    /// Only data younger than the TTL.
    fn get_fresh(&self, key: &CacheKey) -> Option<Vec<LookmarkedEvent>> {
        self.get(key).filter(|c| !c.is_stale).map(|c| c.data)
    }
}

#[derive(Serialize, Deserialize)]
struct Entry {
    key: String,
    lookmarked_events: Vec<LookmarkedEvent>,
    /// Write time in unix milliseconds.
    timestamp: u64,
}

/// One JSON file per key under `root`.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ttl: CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Filesystem-safe path for a key.
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(key.to_string().as_bytes());
        self.root.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    fn read(&self, key: &CacheKey) -> Result<Option<Cached>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let entry: Entry = serde_json::from_str(&fs::read_to_string(path)?)?;
        if entry.key != key.to_string() {
            return Ok(None);
        }
        let age = now_millis().saturating_sub(entry.timestamp);
        Ok(Some(Cached {
            data: entry.lookmarked_events,
            is_stale: age > self.ttl.as_millis() as u64,
        }))
    }

    fn write(&self, key: &CacheKey, data: &[LookmarkedEvent]) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let entry = Entry {
            key: key.to_string(),
            lookmarked_events: data.to_vec(),
            timestamp: now_millis(),
        };
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&tmp, &entry)?;
        tmp.persist(self.entry_path(key))?;
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if is_entry_file(&path) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|e| e == "json")
}

impl LookmarkCache for FileCache {
    fn get(&self, key: &CacheKey) -> Option<Cached> {
        self.read(key).unwrap_or_else(|e| {
            debug!(key = %key, error = %e, "cache read failed");
            None
        })
    }

    fn put(&self, key: &CacheKey, data: &[LookmarkedEvent]) {
        if let Err(e) = self.write(key, data) {
            debug!(key = %key, error = %e, "cache write failed");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.remove_all() {
            debug!(error = %e, "cache clear failed");
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::TargetRef;
    use tempfile::TempDir;

    fn group(target: char, at: u64) -> LookmarkedEvent {
        LookmarkedEvent {
            event: None,
            target: TargetRef::Id(target.to_string().repeat(64)),
            lookmarks: vec![],
            latest_lookmark_at: at,
        }
    }

    #[test]
    fn key_format() {
        assert_eq!(CacheKey::new(None, "default").to_string(), "global:default");
        assert_eq!(CacheKey::new(Some("pk"), "ab12cd34").to_string(), "pk:ab12cd34");
    }

    #[test]
    fn put_get_clear() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));
        let key = CacheKey::new(None, "default");
        assert!(cache.get(&key).is_none());
        cache.put(&key, &[group('a', 3)]);
        let hit = cache.get(&key).unwrap();
        assert!(!hit.is_stale);
        assert_eq!(hit.data, vec![group('a', 3)]);
        assert_eq!(cache.get_fresh(&key), Some(vec![group('a', 3)]));

        // replacing an entry keeps only the latest write
        cache.put(&key, &[group('b', 4)]);
        assert_eq!(cache.get(&key).unwrap().data, vec![group('b', 4)]);

        let other = CacheKey::new(Some("pk"), "default");
        assert!(cache.get(&other).is_none());

        cache.clear();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn expired_entries_are_stale_but_returned() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().to_path_buf()).with_ttl(Duration::ZERO);
        let key = CacheKey::new(Some("pk"), "f00");
        cache.put(&key, &[group('a', 1)]);
        std::thread::sleep(Duration::from_millis(5));
        let hit = cache.get(&key).unwrap();
        assert!(hit.is_stale);
        assert_eq!(hit.data.len(), 1);
        assert!(cache.get_fresh(&key).is_none());
    }

    #[test]
    fn unusable_storage_degrades_to_noop() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // root is a regular file, so every operation fails internally
        let cache = FileCache::new(blocker.join("cache"));
        let key = CacheKey::new(None, "default");
        cache.put(&key, &[group('a', 1)]);
        assert!(cache.get(&key).is_none());
        cache.clear();
    }
}
