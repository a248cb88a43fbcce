//! Test harness for the leap client.
//!
//! [`MockBridge`] plays the bridge's side of the line protocol over
//! in-process duplex pipes: each client dial produces a fresh pipe whose
//! far end pops out of [`MockBridge::accept`]. Tests read the requests the
//! client wrote and push back whatever lines they please: well-formed
//! responses, garbage, or nothing at all.
//!
//! # Usage
//!
//! ```ignore
//! let (mut bridge, dialer) = MockBridge::new();
//! let client = LeapClient::with_dialer(Box::new(dialer), Box::new(SequentialTags::new()), config);
//!
//! let pending = tokio::spawn({
//!     let client = client.clone();
//!     async move { client.request(CommuniqueType::ReadRequest, "/device", None, None).await }
//! });
//!
//! let mut conn = bridge.accept().await;
//! let request = conn.recv_request().await.unwrap();
//! conn.send_line(&ok_response("ReadResponse", request.tag().unwrap(), "/device")).await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use leap::{BoxedReader, BoxedWriter, Dial, LeapError, LineBuffer, TagSource};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Deterministic tag source: `tag-0`, `tag-1`, ...
#[derive(Debug, Default)]
pub struct SequentialTags {
    counter: AtomicU64,
}

impl SequentialTags {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagSource for SequentialTags {
    fn next_tag(&self) -> String {
        format!("tag-{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// Hands the client a fresh in-process pipe on every dial.
pub struct PipeDialer {
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

impl Dial for PipeDialer {
    fn dial(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter), LeapError>> + Send + '_>>
    {
        let accepted = self.accepted.clone();
        Box::pin(async move {
            let (client_end, bridge_end) = tokio::io::duplex(PIPE_CAPACITY);
            accepted.send(bridge_end).map_err(|_| {
                LeapError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock bridge is gone",
                ))
            })?;
            let (reader, writer) = tokio::io::split(client_end);
            Ok((
                Box::new(reader) as BoxedReader,
                Box::new(writer) as BoxedWriter,
            ))
        })
    }
}

/// The bridge's side of the test network.
pub struct MockBridge {
    accepted: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MockBridge {
    pub fn new() -> (Self, PipeDialer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { accepted: rx }, PipeDialer { accepted: tx })
    }

    /// Wait for the client's next dial.
    ///
    /// # Panics
    ///
    /// Panics if the dialer has been dropped without dialing.
    pub async fn accept(&mut self) -> BridgeConn {
        let stream = self
            .accepted
            .recv()
            .await
            .expect("client dialer dropped without connecting");
        BridgeConn {
            stream,
            lines: LineBuffer::new(),
            queued: Vec::new(),
        }
    }

    /// A dial that already happened, if any. Lets tests assert that no
    /// second connection was opened.
    pub fn try_accept(&mut self) -> Option<BridgeConn> {
        self.accepted.try_recv().ok().map(|stream| BridgeConn {
            stream,
            lines: LineBuffer::new(),
            queued: Vec::new(),
        })
    }
}

/// One accepted connection, bridge side.
pub struct BridgeConn {
    stream: DuplexStream,
    lines: LineBuffer,
    queued: Vec<RecordedRequest>,
}

impl BridgeConn {
    /// Read the next request line the client wrote. `None` once the client
    /// has closed its write half.
    pub async fn recv_request(&mut self) -> Option<RecordedRequest> {
        loop {
            if !self.queued.is_empty() {
                return Some(self.queued.remove(0));
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            for line in self.lines.feed(&buf[..n]) {
                let value = serde_json::from_slice(&line)
                    .expect("client wrote a line that is not valid JSON");
                self.queued.push(RecordedRequest(value));
            }
        }
    }

    /// Keep reading until a request for `url` arrives, answering nothing.
    /// Requests for other urls (keep-alive pings, mostly) are discarded.
    pub async fn recv_request_for(&mut self, url: &str) -> Option<RecordedRequest> {
        loop {
            let request = self.recv_request().await?;
            if request.url() == Some(url) {
                return Some(request);
            }
            tracing::debug!(url = ?request.url(), "mock bridge ignoring request");
        }
    }

    /// Write one raw line followed by the delimiter.
    pub async fn send_line(&mut self, line: &str) {
        self.stream
            .write_all(line.as_bytes())
            .await
            .expect("mock bridge write failed");
        self.stream
            .write_all(b"\n")
            .await
            .expect("mock bridge write failed");
    }

    /// Write raw bytes with no delimiter handling at all.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("mock bridge write failed");
    }

    /// Drop the connection; the client sees EOF.
    pub fn hang_up(self) {}
}

/// A request line as the bridge received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest(pub serde_json::Value);

impl RecordedRequest {
    pub fn communique_type(&self) -> Option<&str> {
        self.0["CommuniqueType"].as_str()
    }

    pub fn tag(&self) -> Option<&str> {
        self.0["Header"]["ClientTag"].as_str()
    }

    pub fn url(&self) -> Option<&str> {
        self.0["Header"]["Url"].as_str()
    }
}

/// A `200 OK` response line for `tag`, with no body.
pub fn ok_response(communique_type: &str, tag: &str, url: &str) -> String {
    serde_json::json!({
        "CommuniqueType": communique_type,
        "Header": {"ClientTag": tag, "StatusCode": "200 OK", "Url": url}
    })
    .to_string()
}

/// A response line for `tag` carrying a typed body.
pub fn body_response(
    communique_type: &str,
    tag: &str,
    url: &str,
    body_type: &str,
    body: serde_json::Value,
) -> String {
    serde_json::json!({
        "CommuniqueType": communique_type,
        "Header": {
            "ClientTag": tag,
            "StatusCode": "200 OK",
            "Url": url,
            "MessageBodyType": body_type
        },
        "Body": body
    })
    .to_string()
}

/// An untagged server-push line.
pub fn unsolicited_response(url: &str) -> String {
    serde_json::json!({
        "CommuniqueType": "ReadResponse",
        "Header": {"StatusCode": "200 OK", "Url": url}
    })
    .to_string()
}
