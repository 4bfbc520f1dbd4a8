//! Discovery and aggregation of 👀 "lookmarks" on Nostr.
//!
//! [`Engine::fetch_page`] finds lookmark notes and reactions across relays,
//! resolves the events they point at and groups them by target.
//! [`LookmarkFeed`] pages through the results with a cached first paint.

pub mod activity;
pub mod backoff;
pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod event;
pub mod feed;
pub mod filter;
pub mod lookup;
pub mod memory;
pub mod pool;
pub mod reference;
pub mod relays;
pub mod source;
pub mod sync;

pub use cache::{CacheKey, Cached, FileCache, LookmarkCache};
pub use classify::{classify, LookmarkType};
pub use engine::{Engine, Lookmark, LookmarkedEvent, Page, Profile};
pub use event::Event;
pub use feed::{FeedStatus, LookmarkFeed};
pub use filter::Filter;
pub use memory::MemorySource;
pub use pool::RelayPool;
pub use reference::{Coordinate, TargetRef};
pub use relays::{RelayList, SharedRelays};
pub use source::{EventSource, SourceError};
