//! Client SDK for the Hello Patient chatbot.
//!
//! The entry point is [`session::spawn`], which starts a session actor and
//! returns a [`session::SessionHandle`] for commands plus a receiver of
//! [`event::Event`]s for the UI layer. The actor resolves the (user, thread)
//! identity, loads history, keeps one WebSocket open per identity and merges
//! everything into a single ordered timeline.
//!
//! Collaborators are injected behind traits so the session can run against
//! the real backend ([`api::HttpApi`], [`transport::WsTransport`],
//! [`store::FileStore`]) or against the doubles in [`testing`].

pub mod api;
pub mod channel;
pub mod event;
pub mod identity;
pub mod message;
pub mod session;
pub mod store;
pub mod testing;
pub mod timeline;
pub mod transport;

pub use event::Event;
pub use identity::Identity;
pub use message::{Message, Sender};
pub use session::{Confirm, SessionConfig, SessionHandle, Snapshot, spawn};
