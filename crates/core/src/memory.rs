//! Conversational memory.
//!
//! A memory is an ordered log of role-tagged messages, owned by one session
//! or agent at a time. Agents only append; callers may replace the whole log,
//! e.g. when loading it from disk.

mod conversation;
mod vector;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thoughtloop_model::{Message, Role};

pub use conversation::ConversationMemory;
pub use vector::VectorMemory;

use crate::Error;

/// The persisted form of a memory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryDocument {
    #[serde(default)]
    messages: Vec<Message>,
}

/// An ordered, persistable log of messages.
pub trait Memory: Send + Sync {
    /// Returns all messages in insertion order.
    fn messages(&self) -> &[Message];

    /// Appends a message.
    fn push(&mut self, message: Message);

    /// Replaces the whole log.
    fn replace(&mut self, messages: Vec<Message>);

    /// Returns up to `limit` messages relevant to `query`, in insertion
    /// order.
    fn recall(&self, query: &str, limit: usize) -> Vec<Message>;

    /// Appends a plain text message.
    fn add(&mut self, role: Role, content: &str) {
        self.push(Message::new(role, content));
    }

    /// Removes all messages.
    fn clear(&mut self) {
        self.replace(Vec::new());
    }

    /// Returns the number of messages.
    fn len(&self) -> usize {
        self.messages().len()
    }

    /// Returns `true` if there is no message.
    fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    /// Writes the log to `path` as a JSON document, creating parent
    /// directories as needed.
    fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let document = MemoryDocument {
            messages: self.messages().to_vec(),
        };
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        debug!("saved {} messages to {}", self.len(), path.display());
        Ok(())
    }

    /// Replaces the log with the document at `path`.
    fn load(&mut self, path: &Path) -> Result<(), Error> {
        let text = fs::read_to_string(path)?;
        let document: MemoryDocument = serde_json::from_str(&text)?;
        debug!(
            "loaded {} messages from {}",
            document.messages.len(),
            path.display()
        );
        self.replace(document.messages);
        Ok(())
    }
}

/// The memory variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// A plain log, recalling the most recent messages.
    #[default]
    Conversation,
    /// A log with similarity search, recalling the most similar messages.
    Vector,
}

/// Creates an empty memory of the given kind.
pub fn new_memory(kind: MemoryKind) -> Box<dyn Memory> {
    match kind {
        MemoryKind::Conversation => Box::new(ConversationMemory::new()),
        MemoryKind::Vector => Box::new(VectorMemory::new()),
    }
}
