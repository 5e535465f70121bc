use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ms;

/// Reply appended as a model turn whenever a turn fails.
pub const ERROR_REPLY: &str = "I'm sorry, something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Audio,
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Preview location served by the storage routes.
    #[serde(default)]
    pub url: String,
    pub base64: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    /// Clicking the active rating again clears it.
    pub fn toggle(current: Option<Feedback>, requested: Feedback) -> Option<Feedback> {
        if current == Some(requested) {
            None
        } else {
            Some(requested)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl Message {
    pub fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self::new(MessageRole::User, text.into(), attachments)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Model, text.into(), Vec::new())
    }

    pub fn error() -> Self {
        Self {
            is_error: true,
            ..Self::new(MessageRole::Model, ERROR_REPLY.to_string(), Vec::new())
        }
    }

    fn new(role: MessageRole, text: String, attachments: Vec<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text,
            attachments,
            timestamp: now_ms(),
            is_error: false,
            feedback: None,
        }
    }
}
