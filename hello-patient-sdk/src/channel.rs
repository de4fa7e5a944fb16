//! Channel manager: owns the single live connection and its state machine.
//!
//! ```text
//! Closed --open()--> Connecting --Opened--> Open --Closed--> Closed
//!                                   ^                          |
//!                                   +----- reconnect timer ----+
//! ```
//!
//! Each `open()` starts a new generation. Only events tagged with the current
//! generation are acted on; `close()` and a re-`open()` retire the previous
//! generation, which is how stale handlers are unsubscribed.

use std::sync::Arc;

use crate::identity::Identity;
use crate::message::{InboundFrame, Message, OutboundFrame};
use crate::transport::{
    ChannelEvent, EventSink, EventTarget, Link, Transport, TransportError, stream_url,
};

/// Lifecycle of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What the session should do after a connection event.
#[derive(Debug, PartialEq)]
pub enum Reaction {
    /// Event from a retired generation, or nothing to do.
    Ignored,
    /// Connectivity or state changed; nothing to append.
    Updated,
    /// A bot message arrived.
    Inbound(Message),
    /// The current connection closed; a reconnect for this generation may follow.
    Closed { generation: u64 },
}

struct ActiveLink {
    generation: u64,
    link: Box<dyn Link>,
}

pub struct ChannelManager {
    api_url: String,
    transport: Arc<dyn Transport>,
    target: Arc<dyn EventTarget>,
    next_generation: u64,
    active: Option<ActiveLink>,
    state: ConnectionState,
    connected: bool,
}

impl ChannelManager {
    pub fn new(
        api_url: &str,
        transport: Arc<dyn Transport>,
        target: Arc<dyn EventTarget>,
    ) -> Self {
        Self {
            api_url: api_url.to_string(),
            transport,
            target,
            next_generation: 1,
            active: None,
            state: ConnectionState::Closed,
            connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The binary connectivity indicator shown to users.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Generation of the connection currently owned, if any.
    pub fn generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == Some(generation)
    }

    /// Replace any existing connection with a new one for `identity`.
    pub fn open(&mut self, identity: &Identity) -> u64 {
        self.close();

        let generation = self.next_generation;
        self.next_generation += 1;

        let url = stream_url(&self.api_url, identity);
        tracing::info!(%url, generation, "Connecting stream");
        let sink = EventSink::new(generation, self.target.clone());
        let link = self.transport.open(&url, sink);
        self.active = Some(ActiveLink { generation, link });
        self.state = ConnectionState::Connecting;
        generation
    }

    /// Tear down the current connection. No reconnect follows.
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            tracing::debug!(generation = active.generation, "Closing stream");
            active.link.close();
        }
        self.state = ConnectionState::Closed;
        self.connected = false;
    }

    /// Apply a connection event.
    pub fn handle(&mut self, generation: u64, event: ChannelEvent) -> Reaction {
        if !self.is_current(generation) {
            tracing::debug!(generation, ?event, "Ignoring event from retired connection");
            return Reaction::Ignored;
        }

        match event {
            ChannelEvent::Opened => {
                tracing::info!(generation, "Stream connection established");
                self.state = ConnectionState::Open;
                self.connected = true;
                Reaction::Updated
            }
            ChannelEvent::Frame(text) => match InboundFrame::parse(&text) {
                Ok(message) => Reaction::Inbound(message),
                Err(e) => {
                    tracing::error!(generation, error = %e, frame = %text, "Error parsing stream frame");
                    Reaction::Ignored
                }
            },
            ChannelEvent::Error(reason) => {
                tracing::error!(generation, %reason, "Stream error");
                self.connected = false;
                Reaction::Updated
            }
            ChannelEvent::Closed => {
                tracing::info!(generation, "Stream connection closed");
                self.state = ConnectionState::Closed;
                self.connected = false;
                Reaction::Closed { generation }
            }
        }
    }

    /// Send a user message's content over the open connection.
    pub fn transmit(&mut self, content: &str) -> Result<(), TransportError> {
        if self.state != ConnectionState::Open {
            return Err(TransportError::NotConnected);
        }
        let active = self.active.as_mut().ok_or(TransportError::NotConnected)?;
        let frame = OutboundFrame { content }.encode()?;
        active.link.send(frame)
    }
}
