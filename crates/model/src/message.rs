use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// The author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human asking questions.
    User,
    /// The model.
    Assistant,
    /// Instructions and observations injected by the host.
    System,
    /// A tool call result.
    Tool,
}

impl Role {
    /// Returns the wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a multi-part message content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A plain text part.
    Text {
        /// The text.
        text: String,
    },
    /// An image referenced by URL (may be a `data:` URL).
    ImageUrl {
        /// The image location.
        image_url: ImageUrl,
    },
}

/// The location of an image part.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageUrl {
    /// The URL of the image.
    pub url: String,
}

/// The content of a message, either plain text or structured parts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// Structured parts.
    Parts(Vec<ContentPart>),
}

impl Default for Content {
    #[inline]
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl Content {
    /// Returns the textual portion of the content.
    ///
    /// For structured content, text parts are joined with newlines and
    /// non-text parts are skipped.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Content::Text(text) => Cow::Borrowed(text),
            Content::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect();
                Cow::Owned(texts.join("\n"))
            }
        }
    }
}

impl From<String> for Content {
    #[inline]
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<&str> for Content {
    #[inline]
    fn from(value: &str) -> Self {
        Content::Text(value.to_owned())
    }
}

/// The function part of a tool call descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The name of the tool to call.
    pub name: String,
    /// The raw argument text, usually a JSON object.
    pub arguments: String,
}

/// A complete tool call descriptor emitted by the assistant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    /// The unique identifier for the tool call.
    pub id: String,
    /// Always `"function"` for now.
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub kind: String,
    /// The function to call.
    pub function: FunctionCall,
}

fn default_tool_call_type() -> String {
    "function".to_owned()
}

impl ToolCall {
    /// Creates a function tool call.
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            kind: default_tool_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A role-tagged message in a conversation.
///
/// A `tool` message must reference, through `tool_call_id`, a call emitted
/// by a preceding assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// The author of the message.
    pub role: Role,
    /// The content of the message.
    #[serde(default)]
    pub content: Content,
    /// The call this message answers, for `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    /// Creates a text message with the given role.
    #[inline]
    pub fn new<C: Into<Content>>(role: Role, content: C) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Creates a user message.
    #[inline]
    pub fn user<C: Into<Content>>(content: C) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    #[inline]
    pub fn assistant<C: Into<Content>>(content: C) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a system message.
    #[inline]
    pub fn system<C: Into<Content>>(content: C) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a tool result message answering the call `id`.
    #[inline]
    pub fn tool_result<I: Into<String>, C: Into<Content>>(
        id: I,
        content: C,
    ) -> Self {
        Self {
            tool_call_id: Some(id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Attaches tool call descriptors to this message.
    #[inline]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Returns the textual portion of the content.
    #[inline]
    pub fn text(&self) -> Cow<'_, str> {
        self.content.as_text()
    }
}
