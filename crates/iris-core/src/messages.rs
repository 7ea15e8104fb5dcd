use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentId, MessageId, ThreadId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One piece of a message body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Code {
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    Attachment {
        attachment_id: AttachmentId,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn code(language: Option<&str>, code: impl Into<String>) -> Self {
        Self::Code {
            language: language.map(str::to_owned),
            code: code.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Set when the exchange feeding this message failed before the backend
    /// finished its answer.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Message {
    pub fn new(thread_id: ThreadId, role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: MessageId::new(),
            thread_id,
            role,
            parts,
            created_at: Utc::now(),
            updated_at: None,
            truncated: false,
        }
    }

    pub fn user_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::User, vec![MessagePart::text(text)])
    }

    pub fn assistant_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::Assistant, vec![MessagePart::text(text)])
    }

    pub fn system_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::System, vec![MessagePart::text(text)])
    }

    /// Text of the first part, if it is a text part.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.first().and_then(MessagePart::as_text)
    }

    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn attachment_ids(&self) -> Vec<&AttachmentId> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Attachment { attachment_id } => Some(attachment_id),
                _ => None,
            })
            .collect()
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
