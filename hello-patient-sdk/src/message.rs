//! Timeline messages and the wire records they are decoded from.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "you",
            Sender::Bot => "bot",
        }
    }
}

/// A single timeline entry. Identified only by its position in the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A message typed by the local user, stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::User,
            created_at: Utc::now(),
        }
    }

    /// A bot message, stamped now.
    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::Bot,
            created_at: Utc::now(),
        }
    }
}

/// A `created_at` value as it appears on the wire: text or epoch millis.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

/// Resolve a wire timestamp, falling back to the receipt time.
///
/// Accepts RFC 3339, naive ISO-8601 (taken as UTC) and epoch milliseconds.
pub fn resolve_timestamp(raw: Option<&RawTimestamp>) -> DateTime<Utc> {
    let parsed = match raw {
        None => None,
        Some(RawTimestamp::Epoch(ms)) if ms.is_finite() => {
            DateTime::from_timestamp_millis(*ms as i64)
        }
        Some(RawTimestamp::Epoch(_)) => None,
        Some(RawTimestamp::Text(text)) => parse_text_timestamp(text),
    };
    parsed.unwrap_or_else(|| {
        if raw.is_some() {
            tracing::debug!(?raw, "Unparseable timestamp, using receipt time");
        }
        Utc::now()
    })
}

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// One entry of the history endpoint's response.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub content: String,
    pub sender: Sender,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
}

impl From<HistoryRecord> for Message {
    fn from(record: HistoryRecord) -> Self {
        Message {
            created_at: resolve_timestamp(record.created_at.as_ref()),
            content: record.content,
            sender: record.sender,
        }
    }
}

/// A frame pushed by the server over the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub content: String,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
}

impl InboundFrame {
    /// Parse a text frame into a bot message. Only JSON objects qualify.
    pub fn parse(text: &str) -> Result<Message, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("frame is not a JSON object"));
        }
        let frame: InboundFrame = serde_json::from_value(value)?;
        Ok(Message {
            created_at: resolve_timestamp(frame.created_at.as_ref()),
            content: frame.content,
            sender: Sender::Bot,
        })
    }
}

/// A frame sent to the server. Sender and timestamp are owned by the server.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    pub content: &'a str,
}

impl OutboundFrame<'_> {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn inbound_frame_with_rfc3339_timestamp() {
        let msg = InboundFrame::parse(r#"{"content":"hi","created_at":"2024-01-01T00:00:00Z"}"#)
            .unwrap();
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.sender, Sender::Bot);
        assert_eq!(msg.created_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn inbound_frame_with_epoch_millis() {
        let msg = InboundFrame::parse(r#"{"content":"hi","created_at":1704067200000}"#).unwrap();
        assert_eq!(msg.created_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn inbound_frame_without_timestamp_uses_now() {
        let before = Utc::now();
        let msg = InboundFrame::parse(r#"{"content":"hi"}"#).unwrap();
        assert!(msg.created_at >= before);
    }

    #[test]
    fn inbound_frame_rejects_garbage() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"["content"]"#).is_err());
        assert!(InboundFrame::parse(r#"{"text":"hi"}"#).is_err());
        assert!(InboundFrame::parse(r#"{"content":5}"#).is_err());
    }

    #[test]
    fn naive_backend_timestamps_are_utc() {
        let raw = RawTimestamp::Text("2024-03-05T10:20:30.123456".to_string());
        let ts = resolve_timestamp(Some(&raw));
        assert_eq!(ts.timestamp(), Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap().timestamp());
    }

    #[test]
    fn unparseable_text_falls_back_to_now() {
        let before = Utc::now();
        let raw = RawTimestamp::Text("yesterday-ish".to_string());
        assert!(resolve_timestamp(Some(&raw)) >= before);
    }

    #[test]
    fn history_record_keeps_sender() {
        let record: HistoryRecord =
            serde_json::from_str(r#"{"content":"hello","sender":"user","created_at":null}"#)
                .unwrap();
        let msg = Message::from(record);
        assert_eq!(msg.sender, Sender::User);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn outbound_frame_carries_only_content() {
        let json = OutboundFrame { content: "hey" }.encode().unwrap();
        assert_eq!(json, r#"{"content":"hey"}"#);
    }
}
