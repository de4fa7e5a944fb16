//! Turns session events into printable lines.

use chrono::Local;
use hello_patient_sdk::{Event, Message};

pub const CONNECTION_LOST: &str = "Connection lost. Reconnecting...";
pub const RECONNECTED: &str = "Reconnected.";

/// `[HH:MM] you: text`, in local time.
pub fn format_message(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        message.sender.label(),
        message.content
    )
}

/// Line-oriented view of a session.
#[derive(Debug, Default)]
pub struct View {
    loading: bool,
    connected: bool,
    lost: bool,
}

impl View {
    /// Lines to print for `event`, in order.
    pub fn apply(&mut self, event: &Event) -> Vec<String> {
        match event {
            Event::Loading { loading } => {
                self.loading = *loading;
                if *loading {
                    vec!["Loading conversation...".to_string()]
                } else {
                    Vec::new()
                }
            }
            Event::IdentityResolved(identity) => {
                tracing::debug!(%identity, "Conversation resolved");
                Vec::new()
            }
            Event::TimelineReplaced(messages) => {
                let mut lines = vec!["── conversation ──".to_string()];
                lines.extend(messages.iter().map(format_message));
                lines
            }
            Event::MessageAppended(message) => vec![format_message(message)],
            Event::Connectivity { connected } => {
                let was = self.connected;
                self.connected = *connected;
                if was && !connected && !self.loading {
                    self.lost = true;
                    vec![CONNECTION_LOST.to_string()]
                } else if *connected && self.lost {
                    self.lost = false;
                    vec![RECONNECTED.to_string()]
                } else {
                    Vec::new()
                }
            }
            Event::Shutdown => Vec::new(),
        }
    }
}

/// True for an affirmative answer to a y/N prompt.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
