//! The session controller.
//!
//! A session owns the resolved identity, the timeline and the channel manager,
//! and runs as a single tokio task. Everything that can change its state
//! arrives on one input queue: user commands from a [`SessionHandle`],
//! connection events from the transport, and expiries of the reconnect and
//! deferred-send timers. Inputs are handled one at a time in arrival order,
//! so the timeline's order is exactly the order events arrived in.
//!
//! ## Startup
//!
//! 1. Persisted `userId` + `threadId` present: load history, then adopt them.
//!    A 404 from history erases the stale `threadId` and creates a new thread
//!    without ever announcing the stale identity.
//! 2. Otherwise: persist the configured default user id and create a thread,
//!    which seeds the timeline with a welcome message.
//! 3. With an identity in hand, open the stream. Without one the session
//!    stays in the loading state and makes no connection attempt.
//!
//! ## Reconnection
//!
//! When the current connection closes, a single reconnect is scheduled after
//! [`SessionConfig::reconnect_delay`]. There is no backoff growth and no
//! attempt limit. A reconnect is dropped if the connection it was scheduled
//! for has been replaced or torn down in the meantime, and a deferred send is
//! dropped if the identity it was typed under is no longer current.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use crate::api::{Api, ApiError};
use crate::channel::{ChannelManager, ConnectionState, Reaction};
use crate::event::Event;
use crate::identity::{Identity, THREAD_ID_KEY, USER_ID_KEY};
use crate::message::Message;
use crate::store::Store;
use crate::timeline::Timeline;
use crate::transport::{ChannelEvent, EventTarget, Transport};

/// Default backend address.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// User id assigned when nothing is persisted.
pub const DEFAULT_USER_ID: &str = "1";
/// First message of every new thread.
pub const WELCOME_MESSAGE: &str =
    "Welcome to the Hello Patient chatbot! How can I assist you today?";
/// Question put to [`Confirm`] before a reset.
pub const RESET_PROMPT: &str = "Are you sure you want to start a new conversation?";

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base address; the stream URL is derived from it.
    pub api_url: String,
    /// User id assigned when none is persisted.
    pub default_user_id: String,
    /// Delay between a connection closing and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay before a send made while disconnected is retried (once).
    pub send_retry_delay: Duration,
    /// Bot message seeded into every newly created thread.
    pub welcome_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            default_user_id: DEFAULT_USER_ID.to_string(),
            reconnect_delay: Duration::from_secs(1),
            send_retry_delay: Duration::from_secs(1),
            welcome_message: WELCOME_MESSAGE.to_string(),
        }
    }
}

/// Explicit user-intent gate for destructive actions.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Point-in-time copy of the session's observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub identity: Option<Identity>,
    pub messages: Vec<Message>,
    pub connected: bool,
    pub loading: bool,
    pub state: ConnectionState,
}

#[derive(Debug)]
enum Command {
    Send(String),
    Reset,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

#[derive(Debug)]
enum Timer {
    Reconnect { generation: u64 },
    RetrySend { identity: Identity, content: String },
}

#[derive(Debug)]
enum Input {
    Channel(u64, ChannelEvent),
    Timer(Timer),
    Command(Command),
}

/// Delivers connection events into the session's input queue. Holds only a
/// weak sender so live connections don't keep a session with no handles alive.
struct InputTarget(mpsc::WeakUnboundedSender<Input>);

impl EventTarget for InputTarget {
    fn deliver(&self, generation: u64, event: ChannelEvent) -> bool {
        match self.0.upgrade() {
            Some(tx) => tx.send(Input::Channel(generation, event)).is_ok(),
            None => false,
        }
    }
}

/// A handle to a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    fn submit(&self, cmd: Command) -> Result<()> {
        self.inputs
            .send(Input::Command(cmd))
            .map_err(|_| anyhow::anyhow!("session has stopped"))
    }

    /// Send a chat message. Blank content is ignored by the session.
    pub async fn send(&self, content: &str) -> Result<()> {
        self.submit(Command::Send(content.to_string()))
    }

    /// Start a new conversation if `confirm` agrees. Returns whether the
    /// reset was requested.
    pub async fn reset(&self, confirm: impl Confirm) -> Result<bool> {
        if !confirm.confirm(RESET_PROMPT) {
            tracing::debug!("Reset declined");
            return Ok(false);
        }
        self.submit(Command::Reset)?;
        Ok(true)
    }

    /// Current state, after every previously queued input has been handled.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Snapshot(tx))?;
        Ok(rx.await?)
    }

    /// Close the connection and stop the session. No reconnect follows.
    pub async fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }
}

/// Start a session on the current tokio runtime.
///
/// Returns a handle for commands and a receiver for events. The session
/// resolves its identity immediately and stops when [`SessionHandle::shutdown`]
/// is called or every handle is dropped.
pub fn spawn(
    config: SessionConfig,
    api: Arc<dyn Api>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
) -> (SessionHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    let session = Session::new(config, api, store, transport, event_tx, input_tx.downgrade());
    tokio::spawn(session.run(input_rx));

    (SessionHandle { inputs: input_tx }, event_rx)
}

pub(crate) struct Session {
    config: SessionConfig,
    api: Arc<dyn Api>,
    store: Arc<dyn Store>,
    channel: ChannelManager,
    timeline: Timeline,
    identity: Option<Identity>,
    initialized: bool,
    loading: bool,
    reported_connected: bool,
    events: mpsc::Sender<Event>,
    inputs: mpsc::WeakUnboundedSender<Input>,
}

impl Session {
    fn new(
        config: SessionConfig,
        api: Arc<dyn Api>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<Event>,
        inputs: mpsc::WeakUnboundedSender<Input>,
    ) -> Self {
        let target = Arc::new(InputTarget(inputs.clone()));
        let channel = ChannelManager::new(&config.api_url, transport, target);
        Self {
            config,
            api,
            store,
            channel,
            timeline: Timeline::new(),
            identity: None,
            initialized: false,
            loading: false,
            reported_connected: false,
            events,
            inputs,
        }
    }

    /// Runs until shutdown or until every handle is dropped.
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        self.init().await;

        while let Some(input) = inputs.recv().await {
            match input {
                Input::Channel(generation, event) => {
                    self.on_channel_event(generation, event).await;
                }
                Input::Timer(timer) => self.on_timer(timer).await,
                Input::Command(Command::Send(content)) => self.send(content, false).await,
                Input::Command(Command::Reset) => self.reset().await,
                Input::Command(Command::Snapshot(reply)) => {
                    let _ = reply.send(self.snapshot());
                }
                Input::Command(Command::Shutdown) => break,
            }
        }

        self.teardown().await;
    }

    // ── Identity resolution ──

    async fn init(&mut self) {
        if self.initialized {
            tracing::debug!("Session already initialized");
            return;
        }
        self.initialized = true;
        self.set_loading(true).await;

        let resumed = match (self.stored(USER_ID_KEY), self.stored(THREAD_ID_KEY)) {
            (Some(user_id), Some(thread_id)) => Identity::new(user_id, thread_id),
            _ => None,
        };

        match resumed {
            Some(identity) => {
                tracing::info!(%identity, "Resuming persisted thread");
                self.load_history(identity).await;
            }
            None => {
                let user_id = self.user_id_for_new_thread();
                self.persist(USER_ID_KEY, &user_id);
                self.create_thread(&user_id).await;
            }
        }

        self.settle().await;
    }

    fn user_id_for_new_thread(&self) -> String {
        self.identity
            .as_ref()
            .map(|i| i.user_id().to_string())
            .or_else(|| self.stored(USER_ID_KEY))
            .unwrap_or_else(|| self.config.default_user_id.clone())
    }

    async fn adopt(&mut self, identity: Identity) {
        self.identity = Some(identity.clone());
        self.emit(Event::IdentityResolved(identity)).await;
    }

    /// Create a thread for `user_id`, adopt it and seed the welcome message.
    async fn create_thread(&mut self, user_id: &str) -> bool {
        let thread_id = match self.api.create_thread(user_id).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Error creating thread");
                return false;
            }
        };
        let Some(identity) = Identity::new(user_id, thread_id.as_str()) else {
            tracing::error!(user_id, %thread_id, "Backend returned an unusable thread id");
            return false;
        };

        tracing::info!(%identity, "Created thread");
        self.persist(THREAD_ID_KEY, identity.thread_id());
        self.adopt(identity).await;
        let welcome = Message::bot(self.config.welcome_message.as_str());
        self.timeline.replace_all(vec![welcome]);
        self.emit_timeline().await;
        true
    }

    /// Load the persisted thread's history. The identity is adopted unless
    /// the backend says the thread is gone.
    async fn load_history(&mut self, identity: Identity) {
        let result = self
            .api
            .fetch_messages(identity.user_id(), identity.thread_id())
            .await;
        match result {
            Ok(messages) => {
                tracing::debug!(%identity, count = messages.len(), "Loaded history");
                self.adopt(identity).await;
                self.timeline.replace_all(messages);
                self.emit_timeline().await;
            }
            Err(ApiError::NotFound) => {
                tracing::warn!(%identity, "Thread not found, creating a new one");
                self.forget(THREAD_ID_KEY);
                self.create_thread(identity.user_id()).await;
            }
            Err(ApiError::Malformed(reason)) => {
                tracing::error!(%identity, %reason, "Invalid message data format");
                self.adopt(identity).await;
                self.timeline.clear();
                self.emit_timeline().await;
            }
            Err(e) => {
                tracing::error!(%identity, error = %e, "Error fetching messages");
                self.adopt(identity).await;
            }
        }
    }

    /// Leave the loading state and connect, or stay blocked without identity.
    async fn settle(&mut self) {
        match self.identity.clone() {
            Some(identity) => {
                self.set_loading(false).await;
                self.connect(&identity).await;
            }
            None => {
                tracing::warn!("No thread available, session is blocked");
                self.set_loading(true).await;
            }
        }
    }

    // ── Channel ──

    async fn connect(&mut self, identity: &Identity) {
        self.channel.open(identity);
        self.sync_connectivity().await;
    }

    async fn on_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        match self.channel.handle(generation, event) {
            Reaction::Ignored | Reaction::Updated => {}
            Reaction::Inbound(message) => self.append(message).await,
            Reaction::Closed { generation } => {
                if self.identity.is_some() {
                    self.schedule(Timer::Reconnect { generation }, self.config.reconnect_delay);
                }
            }
        }
        self.sync_connectivity().await;
    }

    async fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Reconnect { generation } => {
                if !self.channel.is_current(generation)
                    || self.channel.state() != ConnectionState::Closed
                {
                    tracing::debug!(generation, "Reconnect superseded");
                    return;
                }
                let Some(identity) = self.identity.clone() else {
                    return;
                };
                tracing::info!(generation, "Reconnecting stream");
                self.connect(&identity).await;
            }
            Timer::RetrySend { identity, content } => {
                if self.identity.as_ref() != Some(&identity) {
                    tracing::debug!(%identity, "Conversation changed, dropping deferred message");
                    return;
                }
                self.send(content, true).await;
            }
        }
    }

    fn schedule(&self, timer: Timer, delay: Duration) {
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = inputs.upgrade() {
                let _ = tx.send(Input::Timer(timer));
            }
        });
    }

    // ── Sending ──

    /// `deferred` marks the single retry of a send made while disconnected.
    async fn send(&mut self, content: String, deferred: bool) {
        if content.trim().is_empty() {
            return;
        }
        let Some(identity) = self.identity.clone() else {
            tracing::error!("No thread ID available");
            return;
        };

        if self.channel.state() != ConnectionState::Open {
            if deferred {
                tracing::warn!(%identity, "Still not connected, dropping message");
                return;
            }
            tracing::info!(%identity, "Not connected, reconnecting before send");
            self.connect(&identity).await;
            self.schedule(
                Timer::RetrySend { identity, content },
                self.config.send_retry_delay,
            );
            return;
        }

        self.append(Message::user(content.as_str())).await;
        if let Err(e) = self.channel.transmit(&content) {
            tracing::error!(%identity, error = %e, "Error sending message");
        }
    }

    // ── Reset / teardown ──

    async fn reset(&mut self) {
        tracing::info!("Starting a new conversation");
        self.forget(THREAD_ID_KEY);
        self.timeline.clear();
        self.emit_timeline().await;
        self.set_loading(true).await;
        self.channel.close();
        self.sync_connectivity().await;

        let user_id = self.user_id_for_new_thread();
        if self.stored(USER_ID_KEY).is_none() {
            self.persist(USER_ID_KEY, &user_id);
        }
        self.identity = None;
        self.create_thread(&user_id).await;
        self.settle().await;
    }

    async fn teardown(&mut self) {
        tracing::debug!("Session shutting down");
        self.channel.close();
        self.sync_connectivity().await;
        self.emit(Event::Shutdown).await;
    }

    // ── State plumbing ──

    async fn append(&mut self, message: Message) {
        self.timeline.append(message.clone());
        self.emit(Event::MessageAppended(message)).await;
    }

    async fn emit_timeline(&self) {
        self.emit(Event::TimelineReplaced(self.timeline.snapshot()))
            .await;
    }

    async fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(Event::Loading { loading }).await;
        }
    }

    async fn sync_connectivity(&mut self) {
        let connected = self.channel.connected();
        if connected != self.reported_connected {
            self.reported_connected = connected;
            self.emit(Event::Connectivity { connected }).await;
        }
    }

    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            identity: self.identity.clone(),
            messages: self.timeline.snapshot(),
            connected: self.channel.connected(),
            loading: self.loading,
            state: self.channel.state(),
        }
    }

    fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|v| !v.trim().is_empty())
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!(key, error = %e, "Failed to persist");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            tracing::warn!(key, error = %e, "Failed to erase persisted value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{RecordingTransport, ScriptedApi};

    struct Queues {
        _inputs: mpsc::UnboundedSender<Input>,
        _events: mpsc::Receiver<Event>,
    }

    fn session(
        api: Arc<ScriptedApi>,
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
    ) -> (Session, Queues) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (input_tx, _input_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            SessionConfig::default(),
            api,
            store,
            transport,
            events_tx,
            input_tx.downgrade(),
        );
        let queues = Queues {
            _inputs: input_tx,
            _events: events_rx,
        };
        (session, queues)
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let api = Arc::new(ScriptedApi::new());
        let transport = Arc::new(RecordingTransport::new());
        let (mut s, _queues) =
            session(api.clone(), Arc::new(MemoryStore::new()), transport.clone());

        s.init().await;
        s.init().await;

        assert_eq!(api.create_calls(), ["1"]);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn failed_creation_blocks_without_connecting() {
        let api = Arc::new(ScriptedApi::new().on_create(Err(ApiError::Status(500))));
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (mut s, _queues) = session(api, store.clone(), transport.clone());

        s.init().await;

        let snap = s.snapshot();
        assert!(snap.identity.is_none());
        assert!(snap.loading);
        assert_eq!(transport.open_count(), 0);
        assert_eq!(store.get(USER_ID_KEY).as_deref(), Some("1"));
        assert_eq!(store.get(THREAD_ID_KEY), None);
    }

    #[tokio::test]
    async fn send_without_identity_is_noop() {
        let api = Arc::new(ScriptedApi::new().on_create(Err(ApiError::Status(503))));
        let transport = Arc::new(RecordingTransport::new());
        let (mut s, _queues) =
            session(api, Arc::new(MemoryStore::new()), transport.clone());
        s.init().await;

        s.send("hello".to_string(), false).await;

        assert!(s.snapshot().messages.is_empty());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn malformed_history_empties_timeline() {
        let api = Arc::new(
            ScriptedApi::new().on_history(Err(ApiError::Malformed("a string".to_string()))),
        );
        let store = Arc::new(MemoryStore::with_values([
            (USER_ID_KEY, "1"),
            (THREAD_ID_KEY, "42"),
        ]));
        let transport = Arc::new(RecordingTransport::new());
        let (mut s, _queues) = session(api.clone(), store, transport.clone());

        s.init().await;

        let snap = s.snapshot();
        assert!(snap.messages.is_empty());
        assert_eq!(snap.identity, Identity::new("1", "42"));
        assert!(api.create_calls().is_empty());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn history_failure_keeps_identity_and_connects() {
        let api = Arc::new(ScriptedApi::new().on_history(Err(ApiError::Status(500))));
        let store = Arc::new(MemoryStore::with_values([
            (USER_ID_KEY, "1"),
            (THREAD_ID_KEY, "42"),
        ]));
        let transport = Arc::new(RecordingTransport::new());
        let (mut s, _queues) = session(api.clone(), store.clone(), transport.clone());

        s.init().await;

        assert!(s.snapshot().messages.is_empty());
        assert!(api.create_calls().is_empty());
        assert_eq!(store.get(THREAD_ID_KEY).as_deref(), Some("42"));
        assert_eq!(transport.urls(), ["ws://localhost:8000/ws/1/42"]);
    }

    #[tokio::test]
    async fn stored_user_is_kept_when_thread_missing() {
        let api = Arc::new(ScriptedApi::new().on_create(Ok("9".to_string())));
        let store = Arc::new(MemoryStore::with_values([(USER_ID_KEY, "alice")]));
        let transport = Arc::new(RecordingTransport::new());
        let (mut s, _queues) = session(api.clone(), store.clone(), transport);

        s.init().await;

        assert_eq!(api.create_calls(), ["alice"]);
        assert_eq!(s.snapshot().identity, Identity::new("alice", "9"));
        assert_eq!(store.get(THREAD_ID_KEY).as_deref(), Some("9"));
    }
}
