//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};

use crate::{engine::Profile, relays::DISCOVERY_RELAY_URLS};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for cache, relay list and backoff state.
    pub data_dir: PathBuf,
    /// Page size and timeout constants.
    pub profile: Profile,
    /// User relays used until a relay list is persisted.
    pub relays: Vec<String>,
    /// NIP-50 search relays.
    pub discovery_relays: Vec<String>,
    /// Skip appending fallback relays on sync.
    pub fallbacks_disabled: bool,
    /// Drop fetched events whose id or signature does not verify.
    pub verify_sig: bool,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let data_dir = PathBuf::from(env::var("DATA_DIR").context("DATA_DIR not set")?);
        let profile = parse_profile(&env::var("PROFILE").unwrap_or_else(|_| "desktop".into()))?;
        let relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        let discovery_relays = match env::var("DISCOVERY_RELAYS") {
            Ok(s) if !s.trim().is_empty() => csv_strings(s),
            _ => DISCOVERY_RELAY_URLS.iter().map(|s| s.to_string()).collect(),
        };
        let fallbacks_disabled = env::var("FALLBACKS_DISABLED").unwrap_or_else(|_| "0".into()) == "1";
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "0".into()) == "1";
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        Ok(Self {
            data_dir,
            profile,
            relays,
            discovery_relays,
            fallbacks_disabled,
            verify_sig,
            tor_socks,
        })
    }

    pub fn relays_path(&self) -> PathBuf {
        self.data_dir.join("relays.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn backoff_path(&self) -> PathBuf {
        self.data_dir.join("backoff.json")
    }
}

fn parse_profile(name: &str) -> Result<Profile> {
    match name.trim() {
        "" | "desktop" => Ok(Profile::DESKTOP),
        "mobile" => Ok(Profile::MOBILE),
        other => bail!("unknown PROFILE: {other}"),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
