use serde::{Deserialize, Serialize};

use super::{message::Message, now_ms};

/// Title given to a remote chat row when it is created.
pub const NEW_CHAT_TITLE: &str = "New Conversation";
/// Title shown in history until the generated one arrives.
pub const PENDING_CHAT_TITLE: &str = "New Conversation...";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub timestamp: i64,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, title: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages,
            timestamp: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub timestamp: i64,
    pub message_count: usize,
}

impl From<&ChatSession> for ChatSummary {
    fn from(chat: &ChatSession) -> Self {
        Self {
            id: chat.id.clone(),
            title: chat.title.clone(),
            timestamp: chat.timestamp,
            message_count: chat.messages.len(),
        }
    }
}

/// Chat row as kept by the embedded store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_ts: i64,
    pub updated_ts: i64,
}

impl From<ChatRecord> for ChatSession {
    fn from(record: ChatRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            messages: Vec::new(),
            timestamp: record.updated_ts,
        }
    }
}
