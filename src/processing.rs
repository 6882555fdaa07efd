//! Output of one dispatch.

use crate::message::Message;

/// Ordered output messages produced by one `process` or `tick` call.
///
/// Never absent, possibly empty. Results merge by concatenation, preserving
/// order.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    messages: Vec<Message>,
}

impl ProcessingResult {
    /// No messages.
    #[must_use]
    pub const fn empty() -> Self {
        Self { messages: Vec::new() }
    }

    /// A single message.
    #[must_use]
    pub fn of(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends every message of `other`.
    pub fn merge(&mut self, other: Self) {
        self.messages.extend(other.messages);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in production order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }
}

impl From<Vec<Message>> for ProcessingResult {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for ProcessingResult {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ProcessingResult {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
