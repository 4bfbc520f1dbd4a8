//! Known relays and the working relay list.

use std::{
    collections::HashSet,
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Relays that support NIP-50 search, used to discover lookmarks by content.
/// Always read-only.
pub const DISCOVERY_RELAY_URLS: &[&str] = &[
    "wss://relay.nostr.band",
    "wss://relay.ditto.pub",
    "wss://search.nos.today",
];

/// Trusted relays appended as a read-only safety net for target resolution.
pub const FALLBACK_RELAY_URLS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.primal.net",
];

/// Relays used for new or signed-out users, with read and write enabled.
pub const DEFAULT_RELAY_URLS: &[&str] = &[
    "wss://relay.ditto.pub",
    "wss://relay.nostr.band",
    "wss://relay.damus.io",
];

/// Where a relay entry came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Listed by the user (or a default the user accepted).
    #[default]
    User,
    /// Appended from [`FALLBACK_RELAY_URLS`].
    Fallback,
    /// Appended from the discovery relay list.
    Discovery,
}

/// A single relay with its capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relay {
    pub url: String,
    pub read: bool,
    pub write: bool,
    /// Missing in older files; treated as [`Provenance::User`].
    #[serde(default)]
    pub source: Provenance,
}

impl Relay {
    pub fn user(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read: true,
            write: true,
            source: Provenance::User,
        }
    }

    pub fn read_only(url: impl Into<String>, source: Provenance) -> Self {
        Self {
            url: url.into(),
            read: true,
            write: false,
            source,
        }
    }
}

/// The working relay set. Never edited in place once shared; replace it
/// wholesale through [`SharedRelays::replace`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayList {
    pub relays: Vec<Relay>,
    /// `created_at` of the relay list event this set was built from.
    #[serde(default)]
    pub updated_at: u64,
    /// User opted out of appending fallback relays.
    #[serde(default)]
    pub fallbacks_disabled: bool,
}

impl RelayList {
    /// Default list for signed-out users.
    pub fn defaults() -> Self {
        Self::from_urls(DEFAULT_RELAY_URLS.iter().copied())
    }

    /// Build a list of read/write user relays.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relays: urls.into_iter().map(Relay::user).collect(),
            updated_at: 0,
            fallbacks_disabled: false,
        }
    }

    /// URLs of every read-capable relay, without duplicates.
    pub fn read_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.relays
            .iter()
            .filter(|r| r.read)
            .filter(|r| seen.insert(r.url.as_str()))
            .map(|r| r.url.clone())
            .collect()
    }

    /// URLs to publish to. Only the user's own write relays qualify; discovery
    /// and fallback entries never receive writes.
    pub fn write_urls(&self) -> Vec<String> {
        self.relays
            .iter()
            .filter(|r| r.write && r.source == Provenance::User)
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.relays.iter().any(|r| r.url == url)
    }

    /// Short stable hash of the read set, used to scope cache entries.
    pub fn fingerprint(&self) -> String {
        let mut urls = self.read_urls();
        if urls.is_empty() {
            return "default".into();
        }
        urls.sort();
        let mut hasher = Sha1::new();
        hasher.update(urls.join("|").as_bytes());
        hex::encode(hasher.finalize())[..8].to_string()
    }

    /// Load a persisted list, returning `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Persist the list with an atomic replace.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("missing parent directory for relay list"))?;
        fs::create_dir_all(parent)?;
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(tmp.path(), serde_json::to_string_pretty(self)?)?;
        tmp.persist(path)?;
        Ok(())
    }
}

/// Shared handle to the current relay list.
///
/// Readers take an `Arc` snapshot that stays consistent for the whole
/// operation; writers swap in a complete new list.
#[derive(Debug, Clone, Default)]
pub struct SharedRelays(Arc<RwLock<Arc<RelayList>>>);

impl SharedRelays {
    pub fn new(list: RelayList) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(list))))
    }

    pub fn snapshot(&self) -> Arc<RelayList> {
        self.0.read().clone()
    }

    pub fn replace(&self, list: RelayList) {
        *self.0.write() = Arc::new(list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_urls_only_user_relays() {
        let list = RelayList {
            relays: vec![
                Relay::user("wss://mine"),
                Relay {
                    url: "wss://odd".into(),
                    read: true,
                    write: true,
                    source: Provenance::Fallback,
                },
                Relay::read_only("wss://search", Provenance::Discovery),
            ],
            updated_at: 0,
            fallbacks_disabled: false,
        };
        assert_eq!(list.write_urls(), vec!["wss://mine".to_string()]);
        assert_eq!(list.read_urls().len(), 3);
    }

    #[test]
    fn fingerprint_ignores_order_and_write_only() {
        let a = RelayList::from_urls(["wss://a", "wss://b"]);
        let mut b = RelayList::from_urls(["wss://b", "wss://a"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.relays.push(Relay {
            url: "wss://w".into(),
            read: false,
            write: true,
            source: Provenance::User,
        });
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 8);
        assert_eq!(RelayList::default().fingerprint(), "default");
    }

    #[test]
    fn missing_provenance_defaults_to_user() {
        let relay: Relay =
            serde_json::from_str(r#"{"url":"wss://x","read":true,"write":false}"#).unwrap();
        assert_eq!(relay.source, Provenance::User);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/relays.json");
        assert!(RelayList::load(&path).unwrap().is_none());
        let mut list = RelayList::defaults();
        list.updated_at = 42;
        list.save(&path).unwrap();
        assert_eq!(RelayList::load(&path).unwrap(), Some(list));
    }

    #[test]
    fn snapshot_survives_replace() {
        let shared = SharedRelays::new(RelayList::from_urls(["wss://old"]));
        let before = shared.snapshot();
        shared.replace(RelayList::from_urls(["wss://new"]));
        assert_eq!(before.read_urls(), vec!["wss://old".to_string()]);
        assert_eq!(shared.snapshot().read_urls(), vec!["wss://new".to_string()]);
    }
}
