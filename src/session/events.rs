use serde::Serialize;

use crate::{
    model::{
        chat::{ChatSession, ChatSummary},
        message::Message,
        user::UserProfile,
    },
    render::Welcome,
};

/// State changes pushed to the client, serialized with a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Welcome {
        signed_in: bool,
        welcome: Welcome,
    },
    Profile {
        profile: Option<UserProfile>,
    },
    History {
        chats: Vec<ChatSummary>,
    },
    /// Full replacement of the visible conversation.
    Messages {
        chat_id: Option<String>,
        messages: Vec<Message>,
    },
    /// One message appended to the visible conversation.
    Message {
        chat_id: Option<String>,
        message: Message,
    },
    Chunk {
        chat_id: String,
        text: String,
    },
    Title {
        chat_id: String,
        title: String,
    },
    Loading {
        loading: bool,
    },
    ChatSelected {
        chat_id: Option<String>,
    },
    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn history(chats: &[ChatSession]) -> Self {
        SessionEvent::History {
            chats: chats.iter().map(ChatSummary::from).collect(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }
}
