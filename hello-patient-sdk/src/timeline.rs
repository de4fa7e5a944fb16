//! Append-only ordered message list.

use crate::message::Message;

/// The conversation as rendered: insertion order is display order.
///
/// There is no dedup key and no per-entry removal. History loading and reset
/// swap the whole list at once.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy for consumers outside the session task.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_duplicates_in_order() {
        let mut t = Timeline::new();
        t.append(Message::user("hi"));
        t.append(Message::bot("hello"));
        t.append(Message::user("hi"));
        let contents: Vec<_> = t.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["hi", "hello", "hi"]);
    }

    #[test]
    fn replace_and_clear() {
        let mut t = Timeline::new();
        t.append(Message::user("a"));
        t.replace_all(vec![Message::bot("x"), Message::bot("y")]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].content, "x");
        t.clear();
        assert!(t.is_empty());
    }
}
