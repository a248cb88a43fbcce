//! Connection manager: owns the single TLS connection and exposes the
//! request/subscribe/close contract.
//!
//! # Key invariant
//!
//! Only the reader task consumes the connection's read half, and only the
//! side that removes the connection from its slot drains the correlation
//! table. A generation counter ties each reader to the connection it was
//! spawned for, so a stale reader exiting late cannot tear down its
//! successor.
//!
//! # Usage
//!
//! ```ignore
//! let client = LeapClient::new("192.168.1.40", LEAP_PORT, &identity)?;
//! client.on_unsolicited(|response| println!("pushed: {response:?}"));
//!
//! let devices = client.request(CommuniqueType::ReadRequest, "/device", None, None).await?;
//! client.close().await; // the next request reconnects transparently
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::body::Body;
use crate::dial::{BoxedReader, BoxedWriter, ClientIdentity, Dial, TlsDialer};
use crate::error::LeapError;
use crate::message::{CommuniqueType, Request, Response, ResponseWithTag};
use crate::parser::LineBuffer;
use crate::table::{CorrelationTable, Handler};
use crate::{Href, TagSource, UuidTags};

/// The bridge's LEAP port.
pub const LEAP_PORT: u16 = 8081;

/// Lightweight resource polled by the keep-alive loop.
pub const PING_URL: &str = "/server/1/status/ping";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_PENDING: usize = 8192;
const DEFAULT_PING_INTERVAL_MS: u64 = 60_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 1_000;

fn env_ms(var: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

/// Tunables for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a request waits for its response before failing.
    pub request_timeout: Duration,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// How long a keep-alive ping waits before being logged as lost.
    pub ping_timeout: Duration,
    /// Cap on concurrently pending requests.
    pub max_pending: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: env_ms("LEAP_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            max_pending: std::env::var("LEAP_MAX_PENDING")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_PENDING),
        }
    }
}

struct Conn {
    writer: BoxedWriter,
    generation: u64,
    /// Signals the reader task to stop on a locally initiated close.
    shutdown: Option<oneshot::Sender<()>>,
    keepalive: JoinHandle<()>,
}

struct ClientInner {
    dialer: Box<dyn Dial>,
    tags: Box<dyn TagSource>,
    config: ClientConfig,
    table: CorrelationTable,
    conn: AsyncMutex<Option<Conn>>,
    generation: AtomicU64,
    disconnected: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

/// A LEAP protocol client.
///
/// Cheap to clone; clones share the connection and correlation state.
#[derive(Clone)]
pub struct LeapClient {
    inner: Arc<ClientInner>,
}

impl LeapClient {
    /// Build a client that dials `host:port` over TLS with the paired
    /// identity. PEM problems in the identity surface here.
    pub fn new(host: &str, port: u16, identity: &ClientIdentity) -> Result<Self, LeapError> {
        let dialer = TlsDialer::new(host, port, identity)?;
        Ok(Self::with_dialer(
            Box::new(dialer),
            Box::new(UuidTags),
            ClientConfig::default(),
        ))
    }

    /// Build a client over explicit collaborators. This is the seam tests
    /// use to substitute an in-memory transport and deterministic tags.
    pub fn with_dialer(
        dialer: Box<dyn Dial>,
        tags: Box<dyn TagSource>,
        config: ClientConfig,
    ) -> Self {
        let max_pending = config.max_pending;
        Self {
            inner: Arc::new(ClientInner {
                dialer,
                tags,
                config,
                table: CorrelationTable::new(max_pending),
                conn: AsyncMutex::new(None),
                generation: AtomicU64::new(0),
                disconnected: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Establish the connection if it is not already up.
    ///
    /// Idempotent: concurrent callers serialize on the connection slot, so
    /// at most one handshake is ever in flight and the rest observe its
    /// outcome.
    pub async fn connect(&self) -> Result<(), LeapError> {
        self.inner.connect().await
    }

    /// Send a request and wait for the response bearing the same tag.
    ///
    /// Connects first if necessary. When `tag` is `None` one is minted from
    /// the tag source. The returned response may itself describe a
    /// protocol-level failure (unsuccessful status, `ExceptionResponse`);
    /// interpreting it is the caller's business.
    pub async fn request(
        &self,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<serde_json::Value>,
        tag: Option<String>,
    ) -> Result<Response, LeapError> {
        let tag = tag.unwrap_or_else(|| self.inner.tags.next_tag());
        self.inner
            .request(true, self.inner.config.request_timeout, communique_type, url, body, tag)
            .await
    }

    /// Issue a subscribe request and, when its response is successful,
    /// install `handler` for every later message carrying the same tag.
    ///
    /// The response and the tag used are always returned, so a caller can
    /// see a failed subscribe rather than waiting on a callback that will
    /// never fire.
    pub async fn subscribe(
        &self,
        url: &str,
        handler: impl Fn(Response) + Send + Sync + 'static,
        communique_type: Option<CommuniqueType>,
        body: Option<serde_json::Value>,
        tag: Option<String>,
    ) -> Result<ResponseWithTag, LeapError> {
        let tag = tag.unwrap_or_else(|| self.inner.tags.next_tag());
        let response = self
            .request(
                communique_type.unwrap_or(CommuniqueType::SubscribeRequest),
                url,
                body,
                Some(tag.clone()),
            )
            .await?;

        if response.header.status.as_ref().is_some_and(|s| s.is_successful()) {
            self.inner
                .table
                .promote_subscription(&tag, Arc::new(handler) as Handler);
        } else {
            tracing::warn!(%tag, %url, "subscribe was not successful; no subscription installed");
        }

        Ok(ResponseWithTag { response, tag })
    }

    /// Read a resource and unwrap its body.
    ///
    /// Fails when the response carries no body, or carries an
    /// exception-detail body in place of the resource.
    pub async fn retrieve(&self, href: &Href) -> Result<Body, LeapError> {
        let response = self
            .request(CommuniqueType::ReadRequest, &href.href, None, None)
            .await?;
        match response.body {
            Some(Body::ExceptionDetail(detail)) => Err(LeapError::Exception(detail)),
            Some(body) => Ok(body),
            None => Err(LeapError::NoBody {
                url: href.href.clone(),
            }),
        }
    }

    /// Ping the bridge once, with the normal request timeout.
    pub async fn ping(&self) -> Result<Response, LeapError> {
        self.request(CommuniqueType::ReadRequest, PING_URL, None, None)
            .await
    }

    /// Register an observer for inbound messages that carry no client tag.
    pub fn on_unsolicited(&self, handler: impl Fn(Response) + Send + Sync + 'static) {
        self.inner.table.add_unsolicited(Arc::new(handler) as Handler);
    }

    /// Register an observer for connection loss.
    pub fn on_disconnected(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.disconnected.lock().push(Arc::new(handler));
    }

    /// Tear down the current connection, rejecting whatever was in flight.
    ///
    /// The client remains usable: the next `request` or `connect`
    /// re-establishes the connection.
    pub async fn close(&self) {
        self.inner.teardown(None).await;
    }

    /// Final teardown: remove every registered observer, then close.
    ///
    /// Observers are gone before the close, so none of them sees the
    /// resulting disconnect. Intended for a client about to be discarded.
    pub async fn drain(&self) {
        self.inner.table.clear_observers();
        self.inner.disconnected.lock().clear();
        self.inner.teardown(None).await;
    }

    /// Tags of requests currently awaiting responses (for diagnostics).
    pub fn pending_tags(&self) -> Vec<String> {
        self.inner.table.pending_tags()
    }

    /// Whether a connection is currently established.
    pub async fn is_connected(&self) -> bool {
        self.inner.conn.lock().await.is_some()
    }
}

impl ClientInner {
    async fn connect(self: &Arc<Self>) -> Result<(), LeapError> {
        let mut slot = self.conn.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let (reader, writer) = self.dialer.dial().await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(read_loop(self.clone(), reader, shutdown_rx, generation));
        let keepalive = tokio::spawn(keepalive_loop(self.clone(), generation));

        *slot = Some(Conn {
            writer,
            generation,
            shutdown: Some(shutdown_tx),
            keepalive,
        });
        tracing::debug!(generation, "connection established");
        Ok(())
    }

    /// Send one request and wait for its response.
    ///
    /// `ensure` controls whether a missing connection is re-established
    /// first; the keep-alive loop passes `false` so a dead connection is
    /// surfaced by real traffic, not by pings.
    async fn request(
        self: &Arc<Self>,
        ensure: bool,
        timeout: Duration,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<serde_json::Value>,
        tag: String,
    ) -> Result<Response, LeapError> {
        if ensure {
            self.connect().await?;
        }

        let line = Request {
            communique_type,
            tag: tag.clone(),
            url: url.to_owned(),
            body,
        }
        .encode()?;

        // Register before writing so a fast response cannot miss its waiter.
        let ticket = self.table.register(&tag)?;
        let mut guard = PendingGuard {
            table: &self.table,
            tag: &tag,
            seq: ticket.seq,
            armed: true,
        };

        self.write_line(&line).await?;
        tracing::debug!(%tag, %url, ?communique_type, "request sent");

        match tokio::time::timeout(timeout, ticket.rx).await {
            Ok(Ok(settled)) => {
                guard.disarm();
                settled
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(LeapError::Disconnected)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    %tag,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out waiting for response"
                );
                // The guard removes the entry, so a late response for this
                // tag is routed as unexpected rather than resolved twice.
                Err(LeapError::Timeout { tag: tag.clone() })
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), LeapError> {
        let mut slot = self.conn.lock().await;
        let conn = slot.as_mut().ok_or(LeapError::Disconnected)?;
        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.write_all(b"\n").await?;
        conn.writer.flush().await?;
        Ok(())
    }

    async fn current_generation(&self) -> Option<u64> {
        self.conn.lock().await.as_ref().map(|c| c.generation)
    }

    /// Remove and dismantle the connection.
    ///
    /// `generation` of `None` removes whatever is present (caller-initiated
    /// close); `Some(g)` removes only generation `g` (reader-initiated), so
    /// a late reader exit cannot dismantle a successor connection. The side
    /// that takes the connection out of the slot is the one that drains the
    /// table and notifies observers.
    async fn teardown(self: &Arc<Self>, generation: Option<u64>) {
        // The slot stays locked until the table is drained, so a concurrent
        // reconnect cannot register a pending request that this drain would
        // then reject.
        let mut slot = self.conn.lock().await;
        let conn = match (slot.as_ref(), generation) {
            (Some(c), Some(g)) if c.generation != g => None,
            (Some(_), _) => slot.take(),
            (None, _) => None,
        };
        let Some(mut conn) = conn else {
            return;
        };

        tracing::debug!(generation = conn.generation, "tearing down connection");
        conn.keepalive.abort();
        if let Some(tx) = conn.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = conn.writer.shutdown().await {
            tracing::debug!(error = %e, "write half already gone during teardown");
        }

        self.table.drain();
        self.notify_disconnected();
    }

    fn notify_disconnected(&self) {
        let observers: Vec<Arc<dyn Fn() + Send + Sync>> = self.disconnected.lock().clone();
        for observer in &observers {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer())).is_err() {
                tracing::warn!("disconnected observer panicked");
            }
        }
    }
}

/// Removes the pending entry when a request errors out or its future is
/// dropped before settling. Disarmed once the waiter has been resolved,
/// and a no-op if the tag slot has since been taken by a newer request.
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    tag: &'a str,
    seq: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.table.revoke(self.tag, self.seq) {
            tracing::debug!(tag = %self.tag, "request abandoned; removed pending entry");
        }
    }
}

/// Consumes the connection's read half: frame, decode, dispatch.
///
/// Exits on peer close, socket error, or the local shutdown signal, then
/// tears down its own generation. Undecodable frames are dropped here;
/// they never affect later frames or the connection.
async fn read_loop(
    inner: Arc<ClientInner>,
    mut reader: BoxedReader,
    mut shutdown: oneshot::Receiver<()>,
    generation: u64,
) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!(generation, "reader stopping: local close");
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(generation, "peer closed the connection");
                    break;
                }
                Ok(n) => {
                    for line in lines.feed(&buf[..n]) {
                        match Response::decode(&line) {
                            Ok(response) => inner.table.dispatch(response),
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping undecodable frame");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(generation, error = %e, "socket read error");
                    break;
                }
            }
        }
    }
    inner.teardown(Some(generation)).await;
}

/// Periodically pings the bridge on its own tag.
///
/// A lost or failed ping is logged and nothing else: the connection is left
/// standing, and the next real request discovers a dead socket itself. The
/// loop exits once its generation is no longer current.
async fn keepalive_loop(inner: Arc<ClientInner>, generation: u64) {
    loop {
        tokio::time::sleep(inner.config.ping_interval).await;
        if inner.current_generation().await != Some(generation) {
            break;
        }

        let tag = inner.tags.next_tag();
        tracing::debug!(%tag, "keep-alive ping");
        match inner
            .request(
                false,
                inner.config.ping_timeout,
                CommuniqueType::ReadRequest,
                PING_URL,
                None,
                tag,
            )
            .await
        {
            Ok(response) => {
                tracing::debug!(status = ?response.header.status, "ping answered");
            }
            Err(e) => {
                tracing::warn!(error = %e, "keep-alive ping failed; leaving connection up");
            }
        }
    }
}
