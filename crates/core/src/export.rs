//! Conversation titles and export files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thoughtloop_model::{Message, ModelRequest};

use crate::{Error, ModelClient};

const TITLE_INSTRUCTION: &str =
    "ユーザーのメッセージから、短く簡潔な会話のタイトルを生成してください。20文字以内で。";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A file the user attached to a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// The file name.
    pub name: String,
    /// The media type, e.g. `image/png`.
    pub kind: String,
    /// The file content. Never exported.
    pub content: Vec<u8>,
}

/// What is exported about an attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// The file name.
    pub name: String,
    /// The media type.
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<FileMetadata> for Attachment {
    /// Restores an exported attachment. Its content is not part of the
    /// export, so it comes back empty.
    fn from(metadata: FileMetadata) -> Self {
        Self {
            name: metadata.name,
            kind: metadata.kind,
            content: vec![],
        }
    }
}

impl From<&Attachment> for FileMetadata {
    fn from(attachment: &Attachment) -> Self {
        Self {
            name: attachment.name.clone(),
            kind: attachment.kind.clone(),
        }
    }
}

/// A conversation snapshot as written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationExport {
    /// The conversation title.
    #[serde(default)]
    pub title: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Local>,
    /// The model the conversation was held with.
    #[serde(default)]
    pub model: String,
    /// The full message history.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Names and types of attached files.
    #[serde(default)]
    pub uploaded_files_metadata: Vec<FileMetadata>,
}

impl ConversationExport {
    /// Takes a snapshot stamped with the current time.
    pub fn new(
        title: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<Message>,
        attachments: &[Attachment],
    ) -> Self {
        Self {
            title: title.into(),
            timestamp: Local::now(),
            model: model.into(),
            messages,
            uploaded_files_metadata: attachments.iter().map(Into::into).collect(),
        }
    }

    /// Returns the file name of this snapshot.
    pub fn file_name(&self) -> String {
        let base = format!("{}_{}", self.title, self.timestamp.format(STAMP_FORMAT));
        format!("{}.json", sanitize_file_name(&base))
    }

    /// Writes the snapshot into `dir`, creating it if needed, and returns
    /// the path written.
    pub fn save_in(&self, dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("saved conversation to {}", path.display());
        Ok(path)
    }

    /// Reads a snapshot written by [`ConversationExport::save_in`].
    ///
    /// Missing title, model, messages or file lists load as empty.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let export: Self = serde_json::from_str(&text)?;
        debug!(
            "loaded conversation {:?} with {} messages",
            export.title,
            export.messages.len()
        );
        Ok(export)
    }
}

/// Replaces every character except alphanumerics, space, `-` and `_` with
/// `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Asks the model for a short title of a conversation starting with
/// `first_message`. Falls back to the current timestamp.
pub async fn generate_title(client: &ModelClient, first_message: &str) -> String {
    let req = ModelRequest {
        messages: vec![
            Message::system(TITLE_INSTRUCTION),
            Message::user(first_message),
        ],
        tools: vec![],
        temperature: Some(0.5),
    };
    match client.send_request(req, |_| {}).await {
        Ok(resp) if !resp.text.trim().is_empty() => resp.text.trim().to_owned(),
        Ok(_) => {
            warn!("model returned an empty title");
            Local::now().format(STAMP_FORMAT).to_string()
        }
        Err(err) => {
            warn!("failed to generate title: {err}");
            Local::now().format(STAMP_FORMAT).to_string()
        }
    }
}
