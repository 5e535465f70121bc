use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{message::Attachment, user::UserProfile};

pub mod gemini;

pub use gemini::GeminiClient;

const DEFAULT_TITLE: &str = "Study Session";
const EMPTY_CONTEXT_TITLE: &str = "New Study Session";
const FALLBACK_TITLE_CHARS: usize = 20;

/// One user turn as sent to the model.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub profile: Option<UserProfile>,
}

#[async_trait]
pub trait StudyModel: Send + Sync {
    /// Produce the reply for a turn. Text fragments are pushed to `sink` as they
    /// arrive; the returned string is the complete reply.
    async fn reply(&self, turn: &TurnRequest, sink: Option<mpsc::Sender<String>>)
        -> Result<String>;

    /// Raw title suggestion for a new chat.
    async fn title(&self, context: &str) -> Result<String>;
}

/// Title for a new chat; never fails.
pub async fn generate_chat_title(model: &dyn StudyModel, context: &str) -> String {
    match model.title(context).await {
        Ok(title) => {
            let title = title.trim().trim_matches('"').trim();
            if title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title.to_string()
            }
        }
        Err(err) => {
            warn!(%err, "failed to generate title");
            fallback_title(context)
        }
    }
}

pub fn fallback_title(context: &str) -> String {
    if context.chars().count() > FALLBACK_TITLE_CHARS {
        let head: String = context.chars().take(FALLBACK_TITLE_CHARS).collect();
        format!("{head}...")
    } else if context.is_empty() {
        EMPTY_CONTEXT_TITLE.to_string()
    } else {
        context.to_string()
    }
}
