use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use tracing::info;

use super::{eq, SupabaseClient};
use crate::{
    auth::AuthSession,
    model::{
        chat::ChatSession,
        message::{Feedback, Message},
        now_ms,
    },
    store::ChatStore,
};

/// `chats` / `messages` tables over PostgREST. Row-level security scopes
/// every call to the user whose token is attached.
pub struct SupabaseStore {
    client: SupabaseClient,
}

/// Query-string pairs of a PostgREST call.
type Query<'a> = [(&'a str, String)];

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: Method,
        table: &str,
        query: &Query<'_>,
        user: &AuthSession,
    ) -> RequestBuilder {
        self.client
            .request(method, &self.client.rest_url(table), Some(&user.access_token))
            .query(query)
            .header("Prefer", "return=representation")
    }

    async fn call(
        &self,
        method: Method,
        table: &str,
        query: &Query<'_>,
        user: &AuthSession,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = self.request(method, table, query, user);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.client.send(request).await
    }
}

#[async_trait]
impl ChatStore for SupabaseStore {
    async fn get_chats(&self, user: &AuthSession) -> Result<Vec<ChatSession>> {
        let query = [
            ("user_id", eq(&user.user_id)),
            ("select", "*".to_string()),
            ("order", "updated_at.desc".to_string()),
        ];
        let rows = self.call(Method::GET, "chats", &query, user, None).await?;
        rows_of(&rows).iter().map(chat_from_row).collect()
    }

    async fn get_messages(&self, user: &AuthSession, chat_id: &str) -> Result<Vec<Message>> {
        let query = [
            ("chat_id", eq(chat_id)),
            ("select", "*".to_string()),
            ("order", "created_at.asc".to_string()),
        ];
        let rows = self.call(Method::GET, "messages", &query, user, None).await?;
        rows_of(&rows).iter().map(message_from_row).collect()
    }

    async fn create_chat(&self, user: &AuthSession, title: &str) -> Result<String> {
        let body = json!([{ "user_id": user.user_id, "title": title }]);
        let rows = self.call(Method::POST, "chats", &[], user, Some(body)).await?;
        let id = rows_of(&rows)
            .first()
            .and_then(|row| row["id"].as_str())
            .ok_or_else(|| anyhow!("chat insert returned no id"))?
            .to_string();
        info!(chat_id = id.as_str(), "supabase chat created");
        Ok(id)
    }

    async fn update_chat_title(
        &self,
        user: &AuthSession,
        chat_id: &str,
        title: &str,
    ) -> Result<()> {
        let query = [("id", eq(chat_id))];
        self.call(Method::PATCH, "chats", &query, user, Some(json!({ "title": title })))
            .await?;
        Ok(())
    }

    async fn add_message(
        &self,
        user: &AuthSession,
        chat_id: &str,
        message: &Message,
    ) -> Result<()> {
        self.call(
            Method::POST,
            "messages",
            &[],
            user,
            Some(json!([message_row(chat_id, message)])),
        )
        .await?;

        let query = [("id", eq(chat_id))];
        self.call(
            Method::PATCH,
            "chats",
            &query,
            user,
            Some(json!({ "updated_at": to_timestamp(now_ms()) })),
        )
        .await?;
        Ok(())
    }

    async fn set_feedback(
        &self,
        user: &AuthSession,
        chat_id: &str,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<()> {
        let query = [("id", eq(message_id)), ("chat_id", eq(chat_id))];
        self.call(
            Method::PATCH,
            "messages",
            &query,
            user,
            Some(json!({ "feedback": feedback })),
        )
        .await?;
        Ok(())
    }

    async fn delete_chat(&self, user: &AuthSession, chat_id: &str) -> Result<()> {
        let query = [("id", eq(chat_id))];
        self.call(Method::DELETE, "chats", &query, user, None).await?;
        Ok(())
    }

    async fn clear_history(&self, user: &AuthSession) -> Result<()> {
        let query = [("user_id", eq(&user.user_id))];
        self.call(Method::DELETE, "chats", &query, user, None).await?;
        Ok(())
    }
}

fn rows_of(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

pub fn chat_from_row(row: &Value) -> Result<ChatSession> {
    Ok(ChatSession {
        id: string_field(row, "id")?,
        title: row["title"].as_str().unwrap_or_default().to_string(),
        messages: Vec::new(),
        timestamp: parse_timestamp(row["updated_at"].as_str().unwrap_or_default())?,
    })
}

pub fn message_from_row(row: &Value) -> Result<Message> {
    Ok(Message {
        id: string_field(row, "id")?,
        role: serde_json::from_value(row["role"].clone()).context("invalid message role")?,
        text: row["content"].as_str().unwrap_or_default().to_string(),
        attachments: match &row["attachments"] {
            Value::Null => Vec::new(),
            raw => serde_json::from_value(raw.clone()).context("invalid attachments")?,
        },
        timestamp: parse_timestamp(row["created_at"].as_str().unwrap_or_default())?,
        is_error: false,
        feedback: serde_json::from_value(row["feedback"].clone()).unwrap_or(None),
    })
}

pub fn message_row(chat_id: &str, message: &Message) -> Value {
    json!({
        "id": message.id,
        "chat_id": chat_id,
        "role": message.role.as_str(),
        "content": message.text,
        "attachments": message.attachments,
        "created_at": to_timestamp(message.timestamp),
    })
}

fn string_field(row: &Value, key: &str) -> Result<String> {
    match &row[key] {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(anyhow!("row is missing `{key}`")),
    }
}

/// Postgres timestamps, with or without an offset, as epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .with_context(|| format!("invalid timestamp `{raw}`"))?;
    Ok(naive.and_utc().timestamp_millis())
}

pub fn to_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
