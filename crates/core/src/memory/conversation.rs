use thoughtloop_model::Message;

use super::Memory;

/// A plain in-memory log of messages.
#[derive(Clone, Debug, Default)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    /// Creates an empty memory.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Memory for ConversationMemory {
    #[inline]
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[inline]
    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[inline]
    fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Returns the last `limit` messages.
    fn recall(&self, _query: &str, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use thoughtloop_model::Role;

    use super::*;

    #[test]
    fn test_recall_latest() {
        let mut memory = ConversationMemory::new();
        for idx in 0..5 {
            memory.add(Role::User, &format!("m{idx}"));
        }
        let recalled: Vec<_> = memory
            .recall("anything", 2)
            .iter()
            .map(|m| m.text().into_owned())
            .collect();
        assert_eq!(recalled, ["m3", "m4"]);
        assert_eq!(memory.recall("", 10).len(), 5);
        assert!(memory.recall("", 0).is_empty());

        memory.clear();
        assert!(memory.is_empty());
    }
}
