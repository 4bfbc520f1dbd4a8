//! The relay query capability the engine is written against.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{event::Event, filter::Filter};

/// Errors from a relay query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    #[error("query timed out")]
    Timeout,

    #[error("query cancelled")]
    Cancelled,

    #[error("subscription closed by relay: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no relays to query")]
    NoRelays,
}

/// Something that can run NIP-01 filters against a set of relays.
///
/// Implementations query every relay in `relays`, merge what comes back and
/// only fail when no relay answered. Passing a single URL pins the query to
/// that relay. Dropping the returned future abandons the query.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn query(&self, relays: &[String], filters: &[Filter]) -> Result<Vec<Event>, SourceError>;
}

/// Cancellation scope shared by every query of one operation: the caller's
/// token plus a fixed deadline.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    at: Instant,
}

impl Deadline {
    /// Derive a scope from `parent` that also expires after `timeout`.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            at: Instant::now() + timeout,
        }
    }

    /// Run `fut` until it finishes, the deadline passes or the scope is
    /// cancelled. A cancelled scope never starts `fut`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SourceError::Cancelled),
            res = tokio::time::timeout_at(self.at, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(SourceError::Timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_times_out() {
        let d = Deadline::new(&CancellationToken::new(), Duration::from_millis(20));
        let res: Result<(), _> = d
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(SourceError::Timeout));
    }

    #[tokio::test]
    async fn parent_cancel_propagates() {
        let parent = CancellationToken::new();
        let d = Deadline::new(&parent, Duration::from_secs(5));
        parent.cancel();
        let res: Result<u8, _> = d.run(async { std::future::pending().await }).await;
        assert_eq!(res, Err(SourceError::Cancelled));
    }

    #[tokio::test]
    async fn passes_through_result() {
        let d = Deadline::new(&CancellationToken::new(), Duration::from_secs(5));
        assert_eq!(d.run(async { Ok(3) }).await, Ok(3));
        assert_eq!(
            d.run(async { Err::<u8, _>(SourceError::NoRelays) }).await,
            Err(SourceError::NoRelays)
        );
    }
}
