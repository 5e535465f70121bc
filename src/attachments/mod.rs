use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    model::message::{Attachment, AttachmentType},
    storage::StorageService,
};

pub const UNSUPPORTED_MESSAGE: &str = "Only image, audio, and PDF files are supported.";

/// Attachment payload received from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingAttachment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "dataBase64")]
    pub data_base64: String,
}

impl AttachmentType {
    pub fn classify(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(AttachmentType::Image)
        } else if mime.starts_with("audio/") {
            Some(AttachmentType::Audio)
        } else if mime == "application/pdf" {
            Some(AttachmentType::Pdf)
        } else {
            None
        }
    }
}

/// Validate an upload, keep a copy for previews and build the inline attachment.
pub async fn prepare(
    incoming: &IncomingAttachment,
    storage: &StorageService,
    max_bytes: usize,
) -> Result<Attachment> {
    let Some(kind) = AttachmentType::classify(&incoming.mime_type) else {
        bail!(UNSUPPORTED_MESSAGE);
    };

    let data = strip_data_url(&incoming.data_base64);
    let bytes = STANDARD
        .decode(data.as_bytes())
        .context("attachment data is not valid base64")?;

    if bytes.is_empty() {
        bail!("attachment is empty");
    }
    if bytes.len() > max_bytes {
        bail!(
            "attachment is too large ({} bytes, limit {} bytes)",
            bytes.len(),
            max_bytes
        );
    }

    let stored = storage.save(&bytes, incoming.name.as_deref()).await?;

    Ok(Attachment {
        id: Uuid::new_v4().to_string(),
        kind,
        url: stored.url,
        base64: data.to_string(),
        mime_type: incoming.mime_type.trim().to_string(),
        name: incoming.name.clone().filter(|n| !n.trim().is_empty()),
    })
}

/// Browsers hand over `data:<mime>;base64,<payload>`; only the payload is sent on.
pub(crate) fn strip_data_url(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((_, payload)) => payload,
        None => raw,
    }
}

/// Short label used in summaries and logs.
pub fn describe(attachment: &Attachment) -> String {
    match attachment.kind {
        AttachmentType::Image => "Image".to_string(),
        AttachmentType::Audio => "Audio Clip".to_string(),
        AttachmentType::Pdf => format!(
            "{} (PDF Document)",
            attachment.name.as_deref().unwrap_or("Document.pdf")
        ),
    }
}
