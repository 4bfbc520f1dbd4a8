//! Command line interface for browsing lookmarks. Supports initialization,
//! paging the global or per-user feed, single-event lookups, relay list
//! sync and relay pre-warming.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use lookmarks::{
    backoff::{Backoff, BACKOFF_WINDOW},
    config::Settings,
    relays::RelayList,
    sync::sync_relay_list,
    Coordinate, Engine, FileCache, LookmarkCache, LookmarkFeed, RelayPool, SharedRelays,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "lookmarks",
    author,
    version,
    about = "Browse 👀 lookmarks across Nostr relays",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the `.env` file and the directory tree at `DATA_DIR`.
    Init,
    /// Print grouped lookmarks, globally or for one author.
    Feed {
        /// Only lookmarks authored by this hex public key.
        #[arg(long)]
        pubkey: Option<String>,
        /// Number of pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print lookmarks authored by a user, newest first.
    Activity {
        pubkey: String,
        /// Only lookmarks created at or before this unix timestamp.
        #[arg(long)]
        until: Option<u64>,
    },
    /// Look up one event by id.
    Event { id: String },
    /// Look up the newest version of an addressable event (`kind:pubkey:d`).
    Address { coordinate: String },
    /// Replace the relay list with the user's newer NIP-65 list.
    Sync { pubkey: String },
    /// Print the working relay list.
    Relays,
    /// Open and close a connection to each discovery relay.
    Prewarm,
    /// Remove every cached first page.
    CacheClear,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let cache = Arc::new(FileCache::new(cfg.cache_dir()));
    let relays = SharedRelays::new(load_relays(&cfg));
    let pool = RelayPool::new(cfg.tor_socks.clone(), cfg.verify_sig)
        .with_backoff(Backoff::load(cfg.backoff_path(), BACKOFF_WINDOW));
    let engine = Arc::new(
        Engine::new(Arc::new(pool), relays.clone())
            .with_discovery(cfg.discovery_relays.clone())
            .with_profile(cfg.profile)
            .with_cache(cache.clone()),
    );
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(cfg.cache_dir())?;
            if !cfg.relays_path().exists() {
                relays.snapshot().save(&cfg.relays_path())?;
            }
        }
        Commands::Feed { pubkey, pages } => {
            let mut feed = LookmarkFeed::open(engine, pubkey.as_deref());
            for _ in 0..pages.max(1) {
                if feed.fetch_next_page().await.is_none() {
                    break;
                }
            }
            print_json(&json!({
                "items": feed.items(),
                "next_cursor": feed.pages().last().and_then(|p| p.next_cursor),
            }))?;
        }
        Commands::Activity { pubkey, until } => {
            let page = engine.fetch_activity(&pubkey, until, &cancel).await;
            print_json(&page)?;
        }
        Commands::Event { id } => {
            print_json(&engine.fetch_event(&id, &cancel).await)?;
        }
        Commands::Address { coordinate } => {
            let coord: Coordinate = coordinate
                .parse()
                .map_err(|_| anyhow!("invalid coordinate: {coordinate}"))?;
            print_json(&engine.fetch_addressable(&coord, &cancel).await)?;
        }
        Commands::Sync { pubkey } => {
            let installed = sync_relay_list(
                engine.source(),
                &relays,
                engine.discovery(),
                &pubkey,
                &cancel,
            )
            .await;
            if let Some(list) = &installed {
                list.save(&cfg.relays_path())?;
            }
            print_json(&json!({
                "updated": installed.is_some(),
                "relays": relays.snapshot().as_ref(),
            }))?;
        }
        Commands::Relays => {
            print_json(&*relays.snapshot())?;
        }
        Commands::Prewarm => {
            let connected = engine.source().prewarm(engine.discovery()).await;
            print_json(&json!({ "connected": connected }))?;
        }
        Commands::CacheClear => {
            cache.clear();
        }
    }
    Ok(())
}

/// Persisted relay list, else `RELAYS`, else the defaults.
fn load_relays(cfg: &Settings) -> RelayList {
    let persisted = RelayList::load(&cfg.relays_path()).unwrap_or_else(|e| {
        warn!(path = %cfg.relays_path().display(), error = %e, "ignoring unreadable relay list");
        None
    });
    let mut list = persisted.unwrap_or_else(|| {
        if cfg.relays.is_empty() {
            RelayList::defaults()
        } else {
            RelayList::from_urls(cfg.relays.iter().cloned())
        }
    });
    list.fallbacks_disabled |= cfg.fallbacks_disabled;
    list
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("encoding output")?);
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let data_dir = base_dir.join("lookmarks-data");
    let mut content = String::new();
    content.push_str(&format!("DATA_DIR={}\n", display_path(&data_dir)));
    content.push_str("PROFILE=desktop\n");
    content.push_str("RELAYS=\n");
    content.push_str("DISCOVERY_RELAYS=\n");
    content.push_str("FALLBACKS_DISABLED=0\n");
    content.push_str("VERIFY_SIG=0\n");
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lookmarks=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
