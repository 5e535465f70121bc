use serde::{Deserialize, Serialize};

use crate::model::{chat::ChatSession, message::Message};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatsResponse {
    pub chats: Vec<ChatSession>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub chat_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct GuestHistoryResponse {
    pub device_hash: String,
    pub chats: Vec<ChatSession>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}
