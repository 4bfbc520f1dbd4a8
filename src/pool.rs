//! WebSocket [`EventSource`] speaking NIP-01 to each relay.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{future::join_all, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::{
    backoff::Backoff,
    event::Event,
    filter::Filter,
    source::{EventSource, SourceError},
};

type Ws = WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>;

/// Longest a single relay may take to connect and reach `EOSE`. Events seen
/// before the bound are kept.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(4);

/// How a subscription stopped reading.
enum End {
    Eose,
    Closed,
    Failed(SourceError),
}

/// Keeps idle connections per relay. A query borrows one (or dials a new
/// one), and hands it back once the relay has sent `EOSE`.
pub struct RelayPool {
    tor_socks: Option<String>,
    verify_sig: bool,
    backoff: Option<Backoff>,
    relay_timeout: Duration,
    idle: Mutex<HashMap<String, Vec<Ws>>>,
    next_sub: AtomicU64,
}

impl RelayPool {
    pub fn new(tor_socks: Option<String>, verify_sig: bool) -> Self {
        Self {
            tor_socks,
            verify_sig,
            backoff: None,
            relay_timeout: RELAY_TIMEOUT,
            idle: Mutex::new(HashMap::new()),
            next_sub: AtomicU64::new(0),
        }
    }

    /// Track pre-warm failures in `backoff`.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    /// Connect to each relay and park the connection for the next query.
    /// Relays still inside their backoff window are skipped. Returns the
    /// number of relays now holding a warm connection.
    pub async fn prewarm(&self, urls: &[String]) -> usize {
        let attempts = urls.iter().filter(|url| {
            let suppressed = self.backoff.as_ref().is_some_and(|b| b.is_suppressed(url));
            if suppressed {
                debug!(relay = %url, "pre-warm skipped, relay in backoff");
            }
            !suppressed
        });
        let results = join_all(attempts.map(|url| async move {
            let until = Instant::now() + self.relay_timeout;
            let res = match timeout_at(until, self.connect(url)).await {
                Ok(res) => res,
                Err(_) => Err(anyhow!("connect timed out")),
            };
            (url, res)
        }))
        .await;
        let mut ok = 0;
        for (url, res) in results {
            match res {
                Ok(ws) => {
                    ok += 1;
                    self.park(url, ws);
                    if let Some(b) = &self.backoff {
                        b.record_success(url);
                    }
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "pre-warm failed");
                    if let Some(b) = &self.backoff {
                        b.record_failure(url);
                    }
                }
            }
        }
        ok
    }

    /// Number of parked connections for `url`.
    pub fn idle_connections(&self, url: &str) -> usize {
        self.idle.lock().get(url).map_or(0, Vec::len)
    }

    /// Issue one `REQ` and collect events until `EOSE`, reusing a parked
    /// connection when there is one.
    async fn query_relay(&self, url: &str, filters: &[Filter]) -> Result<Vec<Event>, SourceError> {
        let until = Instant::now() + self.relay_timeout;
        let sub_id = self.subscription_id(url);
        let mut req = vec![Value::String("REQ".into()), Value::String(sub_id.clone())];
        req.extend(filters.iter().map(|f| Value::Object(f.to_json())));
        let req = Value::Array(req).to_string();

        let parked = self.idle.lock().get_mut(url).and_then(Vec::pop);
        if let Some(ws) = parked {
            match self.subscribe(ws, url, &sub_id, &req, until).await {
                Err(SourceError::Unreachable(e)) => {
                    debug!(relay = %url, error = %e, "parked connection unusable, reconnecting");
                }
                res => return res,
            }
        }
        let ws = match timeout_at(until, self.connect(url)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(SourceError::Unreachable(format!("{url}: {e}"))),
            Err(_) => return Err(SourceError::Timeout),
        };
        self.subscribe(ws, url, &sub_id, &req, until).await
    }

    /// Send `req` on `ws` and read the subscription until it ends or `until`
    /// passes. A connection that fails before answering anything reports
    /// `Unreachable`.
    async fn subscribe(
        &self,
        mut ws: Ws,
        url: &str,
        sub_id: &str,
        req: &str,
        until: Instant,
    ) -> Result<Vec<Event>, SourceError> {
        ws.send(Message::Text(req.to_string()))
            .await
            .map_err(|e| SourceError::Unreachable(format!("{url}: {e}")))?;

        let mut events: Vec<Event> = vec![];
        let mut answered = false;
        let end = loop {
            let msg = match timeout_at(until, ws.next()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break End::Closed,
                Err(_) => break End::Failed(SourceError::Timeout),
            };
            let txt = match msg {
                Ok(Message::Text(txt)) => txt,
                Ok(Message::Close(_)) => break End::Closed,
                Ok(_) => continue,
                Err(e) => break End::Failed(SourceError::Protocol(format!("{url}: {e}"))),
            };
            answered = true;
            let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(&txt) else {
                continue;
            };
            match arr.first().and_then(|v| v.as_str()) {
                Some("EVENT") if arr.len() >= 3 => {
                    if arr[1].as_str() != Some(sub_id) {
                        continue;
                    }
                    match serde_json::from_value::<Event>(arr[2].clone()) {
                        Ok(ev) => {
                            if self.verify_sig {
                                if let Err(e) = ev.verify() {
                                    debug!(relay = %url, id = %ev.id, error = %e, "dropping unverified event");
                                    continue;
                                }
                            }
                            if !events.iter().any(|o| o.id == ev.id) {
                                events.push(ev);
                            }
                        }
                        Err(e) => debug!(relay = %url, error = %e, "malformed event"),
                    }
                }
                Some("EOSE") if arr.get(1).and_then(|v| v.as_str()) == Some(sub_id) => {
                    break End::Eose;
                }
                Some("CLOSED") if arr.get(1).and_then(|v| v.as_str()) == Some(sub_id) => {
                    let reason = arr.get(2).and_then(|v| v.as_str()).unwrap_or_default();
                    break End::Failed(SourceError::Rejected(format!("{url}: {reason}")));
                }
                Some("NOTICE") => {
                    let notice = arr.get(1).cloned().unwrap_or(Value::Null);
                    debug!(relay = %url, notice = %notice, "relay notice");
                }
                _ => {}
            }
        };

        match end {
            End::Eose => {
                if ws
                    .send(Message::Text(json!(["CLOSE", sub_id]).to_string()))
                    .await
                    .is_ok()
                {
                    self.park(url, ws);
                }
                Ok(events)
            }
            End::Closed if !answered => {
                Err(SourceError::Unreachable(format!("{url}: connection closed")))
            }
            End::Closed => Ok(events),
            End::Failed(SourceError::Protocol(e)) if !answered => Err(SourceError::Unreachable(e)),
            End::Failed(e) if events.is_empty() => Err(e),
            End::Failed(e) => {
                debug!(relay = %url, error = %e, kept = events.len(), "keeping partial results");
                Ok(events)
            }
        }
    }

    async fn connect(&self, url: &str) -> anyhow::Result<Ws> {
        connect_ws(url, self.tor_socks.as_deref()).await
    }

    fn park(&self, url: &str, ws: Ws) {
        self.idle.lock().entry(url.to_string()).or_default().push(ws);
    }

    /// Short subscription id unique within this pool.
    fn subscription_id(&self, url: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(url.as_bytes());
        let relay_hash = hex::encode(hasher.finalize());
        let n = self.next_sub.fetch_add(1, Ordering::Relaxed);
        format!("lookmarks-{}-{n}", &relay_hash[..8])
    }
}

#[async_trait]
impl EventSource for RelayPool {
    async fn query(&self, relays: &[String], filters: &[Filter]) -> Result<Vec<Event>, SourceError> {
        if relays.is_empty() {
            return Err(SourceError::NoRelays);
        }
        let results = join_all(relays.iter().map(|url| self.query_relay(url, filters))).await;
        let mut out: Vec<Event> = vec![];
        let mut first_err = None;
        let mut answered = false;
        for (url, res) in relays.iter().zip(results) {
            match res {
                Ok(events) => {
                    answered = true;
                    for ev in events {
                        if !out.iter().any(|o| o.id == ev.id) {
                            out.push(ev);
                        }
                    }
                }
                Err(e) => {
                    debug!(relay = %url, error = %e, "relay query failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match (answered, first_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(out),
        }
    }
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> anyhow::Result<Ws> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
