//! The (user, thread) pair a session talks about.

use std::fmt;

/// Storage key for the persisted user id.
pub const USER_ID_KEY: &str = "userId";
/// Storage key for the persisted thread id.
pub const THREAD_ID_KEY: &str = "threadId";

/// A resolved conversation identity.
///
/// Both ids are guaranteed non-blank. An identity is never edited in place:
/// reset and stale-thread recovery build a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    user_id: String,
    thread_id: String,
}

impl Identity {
    /// Returns `None` if either id is blank.
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Option<Self> {
        let user_id = user_id.into();
        let thread_id = thread_id.into();
        if user_id.trim().is_empty() || thread_id.trim().is_empty() {
            return None;
        }
        Some(Self { user_id, thread_id })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(Identity::new("", "42").is_none());
        assert!(Identity::new("1", "  ").is_none());
        assert!(Identity::new("1", "42").is_some());
    }

    #[test]
    fn display_joins_ids() {
        let id = Identity::new("1", "42").unwrap();
        assert_eq!(id.to_string(), "1:42");
        assert_eq!(id.user_id(), "1");
        assert_eq!(id.thread_id(), "42");
    }
}
