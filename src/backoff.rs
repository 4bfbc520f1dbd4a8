//! Persisted suppression of relays that recently failed to connect.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tracing::debug;

/// How long a failed relay is skipped by pre-warm.
pub const BACKOFF_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Failure timestamps (unix seconds) per relay URL, mirrored to a JSON file so
/// the window survives restarts.
#[derive(Debug)]
pub struct Backoff {
    path: PathBuf,
    window: Duration,
    failures: Mutex<BTreeMap<String, u64>>,
}

impl Backoff {
    /// Load the table at `path`. A missing or unreadable file starts empty.
    pub fn load(path: PathBuf, window: Duration) -> Self {
        let failures = read_table(&path).unwrap_or_else(|e| {
            debug!(path = %path.display(), error = %e, "backoff table not loaded");
            BTreeMap::new()
        });
        Self {
            path,
            window,
            failures: Mutex::new(failures),
        }
    }

    /// True while `url` is inside its backoff window.
    pub fn is_suppressed(&self, url: &str) -> bool {
        let now = unix_now();
        self.failures
            .lock()
            .get(url)
            .is_some_and(|failed_at| now.saturating_sub(*failed_at) < self.window.as_secs())
    }

    pub fn record_failure(&self, url: &str) {
        self.update(|table| {
            table.insert(url.to_string(), unix_now());
        });
    }

    pub fn record_success(&self, url: &str) {
        self.update(|table| {
            table.remove(url);
        });
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, u64>)) {
        let snapshot = {
            let mut table = self.failures.lock();
            f(&mut table);
            let now = unix_now();
            let window = self.window.as_secs();
            table.retain(|_, at| now.saturating_sub(*at) < window);
            table.clone()
        };
        if let Err(e) = write_table(&self.path, &snapshot) {
            debug!(path = %self.path.display(), error = %e, "backoff table not saved");
        }
    }
}

fn read_table(path: &Path) -> Result<BTreeMap<String, u64>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn write_table(path: &Path, table: &BTreeMap<String, u64>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("missing parent directory for backoff table"))?;
    fs::create_dir_all(parent)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    fs::write(tmp.path(), serde_json::to_string(table)?)?;
    tmp.persist(path)?;
    Ok(())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
