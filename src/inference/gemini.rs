use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{StudyModel, TurnRequest};
use crate::{config::GeminiConfig, prompts};

pub const NO_RESPONSE_TEXT: &str = "No response generated.";
const ERROR_EXCERPT_CHARS: usize = 200;

/// Gemini `generateContent` client. One request per call, no retries.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Per read, so a long streamed answer is not cut off midway.
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build Gemini http client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn url(&self, method: &str) -> String {
        let mut url = format!("{}/models/{}:{method}?", self.base_url, self.model);
        if method == "streamGenerateContent" {
            url.push_str("alt=sse&");
        }
        url.push_str("key=");
        url.push_str(&self.api_key);
        url
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Response> {
        let response = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .context("gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %excerpt(&text), "gemini error");
            bail!("gemini_error {}: {}", status.as_u16(), excerpt(&text));
        }
        Ok(response)
    }
}

#[async_trait]
impl StudyModel for GeminiClient {
    async fn reply(
        &self,
        turn: &TurnRequest,
        sink: Option<mpsc::Sender<String>>,
    ) -> Result<String> {
        let body = build_turn_body(turn)?;
        info!(
            model = self.model.as_str(),
            attachments = turn.attachments.len(),
            has_program = turn
                .profile
                .as_ref()
                .and_then(|p| p.program.as_ref())
                .is_some(),
            "gemini turn request"
        );

        let response = self.post("streamGenerateContent", &body).await?;
        let mut stream = response.bytes_stream();
        let mut lines = SseBuffer::default();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("gemini stream read error")?;
            for data in lines.push(&chunk) {
                let Ok(event) = serde_json::from_str::<Value>(&data) else {
                    debug!(data = data.as_str(), "skipping non-json sse payload");
                    continue;
                };
                if let Some(err) = event.get("error") {
                    return Err(anyhow!("gemini stream error: {err}"));
                }
                let piece = extract_text(&event);
                if piece.is_empty() {
                    continue;
                }
                full.push_str(&piece);
                if let Some(tx) = &sink {
                    // A closed receiver only means nobody is watching the stream.
                    let _ = tx.send(piece).await;
                }
            }
        }

        if full.trim().is_empty() {
            return Ok(NO_RESPONSE_TEXT.to_string());
        }
        Ok(full)
    }

    async fn title(&self, context: &str) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompts::title_prompt(context) }]
            }]
        });
        let response = self.post("generateContent", &body).await?;
        let value: Value = response.json().await.context("invalid gemini response")?;
        Ok(extract_text(&value))
    }
}

/// Request body for a user turn: attachments first, then the prompt text.
pub fn build_turn_body(turn: &TurnRequest) -> Result<Value> {
    let mut parts: Vec<Value> = turn
        .attachments
        .iter()
        .map(|att| {
            json!({
                "inlineData": {
                    "mimeType": att.mime_type,
                    "data": att.base64,
                }
            })
        })
        .collect();

    if !turn.text.trim().is_empty() {
        parts.push(json!({ "text": turn.text }));
    } else if !turn.attachments.is_empty() {
        parts.push(json!({ "text": prompts::ATTACHMENT_ONLY_PROMPT }));
    }

    if parts.is_empty() {
        bail!("No content to send");
    }

    Ok(json!({
        "contents": [{ "role": "user", "parts": parts }],
        "systemInstruction": {
            "parts": [{ "text": prompts::system_instruction(turn.profile.as_ref()) }]
        }
    }))
}

/// Concatenated text of the first candidate, skipping thought parts.
pub fn extract_text(response: &Value) -> String {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn excerpt(text: &str) -> String {
    text.chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Splits a server-sent-event byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    out.push(data.to_string());
                }
            }
        }

        out
    }
}
