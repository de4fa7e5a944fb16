//! Streaming collaborator: one duplex text channel per opened connection.
//!
//! A [`Transport`] opens connections; each connection reports what happens to
//! it through an [`EventSink`] as a small closed set of [`ChannelEvent`]s and
//! accepts outbound text through its [`Link`]. Every sink is stamped with the
//! generation of the connection it belongs to, so the channel manager can
//! tell a live connection's events from those of one it already discarded.

use std::fmt;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::api::encode_segment;
use crate::identity::Identity;

/// What a connection can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

/// A connection event tagged with the generation that produced it.
pub type TaggedEvent = (u64, ChannelEvent);

/// Whatever queue connection events are delivered into.
pub trait EventTarget: Send + Sync {
    /// Returns false once nobody is listening.
    fn deliver(&self, generation: u64, event: ChannelEvent) -> bool;
}

impl EventTarget for mpsc::UnboundedSender<TaggedEvent> {
    fn deliver(&self, generation: u64, event: ChannelEvent) -> bool {
        self.send((generation, event)).is_ok()
    }
}

/// Where a single connection delivers its events.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    target: Arc<dyn EventTarget>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl EventSink {
    pub fn new(generation: u64, target: Arc<dyn EventTarget>) -> Self {
        Self { generation, target }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving session is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.target.deliver(self.generation, event)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is not open")]
    NotConnected,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The sending half of one opened connection.
pub trait Link: Send + Sync {
    /// Queue a text frame. Fire-and-forget: success means "handed over".
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. No further events are expected to matter.
    fn close(&mut self);
}

/// Something that can open streaming connections.
pub trait Transport: Send + Sync {
    /// Start connecting to `url`. Returns immediately; progress arrives on `sink`.
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Link>;
}

/// Derive the stream URL for an identity from the REST base address.
///
/// The `http` scheme prefix becomes `ws` (so `https` becomes `wss`) and the
/// path is `/ws/{user}/{thread}`.
pub fn stream_url(api_url: &str, identity: &Identity) -> String {
    let base = api_url.trim_end_matches('/');
    let base = match base.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => base.to_string(),
    };
    format!(
        "{base}/ws/{}/{}",
        encode_segment(identity.user_id()),
        encode_segment(identity.thread_id())
    )
}

/// [`Transport`] over WebSocket via tokio-tungstenite.
///
/// Each connection runs in its own task that owns the socket. Dropping or
/// closing the [`Link`] ends the task with a close frame and without a
/// `Closed` event.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Link> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let url = url.to_string();
        tokio::spawn(run_socket(url, sink, out_rx));
        Box::new(WsLink {
            outbound: Some(out_tx),
        })
    }
}

struct WsLink {
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Link for WsLink {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(text).map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(url: String, sink: EventSink, mut outbound: mpsc::UnboundedReceiver<String>) {
    let generation = sink.generation();
    tracing::debug!(%url, generation, "Opening stream");

    let connect = tokio_tungstenite::connect_async(url.as_str());
    tokio::pin!(connect);
    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Stream connect failed");
                    sink.emit(ChannelEvent::Error(e.to_string()));
                    sink.emit(ChannelEvent::Closed);
                    return;
                }
            },
            text = outbound.recv() => match text {
                Some(_) => tracing::debug!(generation, "Dropping frame queued before open"),
                // Link closed while still connecting.
                None => return,
            },
        }
    };

    sink.emit(ChannelEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    sink.emit(ChannelEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    sink.emit(ChannelEvent::Frame(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                // Ping/Pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(generation, error = %e, "Stream read error");
                    sink.emit(ChannelEvent::Error(e.to_string()));
                    break;
                }
            },
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                        tracing::debug!(generation, error = %e, "Stream write error");
                        sink.emit(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    tracing::debug!(generation, "Link closed, shutting stream");
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return;
                }
            },
        }
    }

    sink.emit(ChannelEvent::Closed);
}
