//! In-process doubles for the session's collaborators.
//!
//! `ScriptedApi` answers REST calls from queued results, `RecordingTransport`
//! never touches the network and lets a test drive each connection's events
//! by hand, and `JournalStore` wraps a [`MemoryStore`]. All three can share a
//! [`Journal`] so tests can assert the relative order of side effects
//! (e.g. "thread id persisted before the first connect").

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{Api, ApiError};
use crate::message::Message;
use crate::store::{MemoryStore, Store};
use crate::transport::{ChannelEvent, EventSink, Link, Transport, TransportError};

/// Ordered log of side effects shared between doubles.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }
}

// ── REST ────────────────────────────────────────────────────────────────

/// [`Api`] that replays queued results.
///
/// With nothing queued, thread creation hands out ids counting up from 100
/// and history is empty.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    creates: Mutex<VecDeque<Result<String, ApiError>>>,
    histories: Mutex<VecDeque<Result<Vec<Message>, ApiError>>>,
    create_calls: Mutex<Vec<String>>,
    history_calls: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
    journal: Journal,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            ..Default::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Queue the result of the next `create_thread` call.
    pub fn on_create(self, result: Result<String, ApiError>) -> Self {
        self.creates.lock().push_back(result);
        self
    }

    /// Queue the result of the next `fetch_messages` call.
    pub fn on_history(self, result: Result<Vec<Message>, ApiError>) -> Self {
        self.histories.lock().push_back(result);
        self
    }

    /// User ids passed to `create_thread`, in call order.
    pub fn create_calls(&self) -> Vec<String> {
        self.create_calls.lock().clone()
    }

    /// (user, thread) pairs passed to `fetch_messages`, in call order.
    pub fn history_calls(&self) -> Vec<(String, String)> {
        self.history_calls.lock().clone()
    }
}

#[async_trait]
impl Api for ScriptedApi {
    async fn create_thread(&self, user_id: &str) -> Result<String, ApiError> {
        self.create_calls.lock().push(user_id.to_string());
        self.journal.record(format!("create_thread {user_id}"));
        let queued = self.creates.lock().pop_front();
        queued.unwrap_or_else(|| Ok(self.next_id.fetch_add(1, Ordering::Relaxed).to_string()))
    }

    async fn fetch_messages(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        self.history_calls
            .lock()
            .push((user_id.to_string(), thread_id.to_string()));
        self.journal
            .record(format!("fetch_messages {user_id} {thread_id}"));
        let queued = self.histories.lock().pop_front();
        queued.unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ── Store ───────────────────────────────────────────────────────────────

/// [`MemoryStore`] that journals writes.
#[derive(Debug, Default)]
pub struct JournalStore {
    inner: MemoryStore,
    journal: Journal,
}

impl JournalStore {
    pub fn new(inner: MemoryStore, journal: Journal) -> Self {
        Self { inner, journal }
    }
}

impl Store for JournalStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.journal.record(format!("set {key}={value}"));
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.journal.record(format!("remove {key}"));
        self.inner.remove(key)
    }
}

// ── Transport ───────────────────────────────────────────────────────────

/// Test-side view of one connection opened through [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedLink {
    url: String,
    sink: EventSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl RecordedLink {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    /// Frames the session handed to this connection.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fire an event as if the network produced it. Works even after the
    /// session closed this link, which is how stale handlers are simulated.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.sink.emit(event)
    }
}

struct RecordingLink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl Link for RecordingLink {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// [`Transport`] that records every `open` and never connects by itself.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    links: Mutex<Vec<RecordedLink>>,
    fail_sends: Arc<AtomicBool>,
    journal: Journal,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Make every link reject outbound frames.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.links.lock().iter().map(|l| l.url.clone()).collect()
    }

    /// The `index`-th opened link. Panics if it does not exist.
    pub fn link(&self, index: usize) -> RecordedLink {
        self.links.lock()[index].clone()
    }

    /// The most recently opened link. Panics if none was opened.
    pub fn last(&self) -> RecordedLink {
        let links = self.links.lock();
        links[links.len() - 1].clone()
    }
}

impl Transport for RecordingTransport {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Link> {
        self.journal.record(format!("open {url}"));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.links.lock().push(RecordedLink {
            url: url.to_string(),
            sink,
            sent: sent.clone(),
            closed: closed.clone(),
        });
        Box::new(RecordingLink {
            sent,
            closed,
            fail_sends: self.fail_sends.clone(),
        })
    }
}
