//! Events emitted by the session for the UI layer to consume.

use crate::identity::Identity;
use crate::message::Message;

/// Everything a renderer needs to keep its view in sync with the session.
///
/// Replaying these in order over an empty view reproduces the session's
/// [`Snapshot`](crate::Snapshot).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The session is (or stopped) waiting on identity resolution.
    Loading { loading: bool },

    /// A new identity is in effect (startup, stale-thread recovery, reset).
    IdentityResolved(Identity),

    /// The binary connectivity indicator flipped.
    Connectivity { connected: bool },

    /// One message was appended to the end of the timeline.
    MessageAppended(Message),

    /// The whole timeline was swapped (history load, welcome seed, reset).
    TimelineReplaced(Vec<Message>),

    /// The session actor stopped; no more events follow.
    Shutdown,
}
