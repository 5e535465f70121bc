use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    attachments::{strip_data_url, UNSUPPORTED_MESSAGE},
    model::message::AttachmentType,
    storage::content_type_for,
    ws::AppState,
};

type Rejection = (StatusCode, String);

// Headroom for base64 inflation and the JSON or form envelope.
const JSON_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(alias = "dataBase64")]
    pub data_base64: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub filename: String,
    pub mime_type: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<AttachmentType>,
    pub size: usize,
    pub url: String,
}

/// One uploaded file, whichever encoding it arrived in.
struct Upload {
    name: Option<String>,
    mime_type: Option<String>,
    bytes: Vec<u8>,
}

fn bad_request(context: &str, err: impl std::fmt::Display) -> Rejection {
    (StatusCode::BAD_REQUEST, format!("{context}: {err}"))
}

fn too_large() -> Rejection {
    (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large".to_string())
}

/// Accepts either a multipart form with a single file or a JSON body with a
/// base64 payload. The route runs without axum's default body limit; both
/// readers enforce `max_attachment_bytes` themselves.
pub async fn upload_file(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<UploadResponse>, Rejection> {
    let max_bytes = state.config.max_attachment_bytes;

    let upload = if is_multipart(req.headers()) {
        read_multipart(req, &state, max_bytes).await?
    } else {
        read_json(req, max_bytes).await?
    };

    if upload.bytes.len() > max_bytes {
        return Err(too_large());
    }

    let kind = upload
        .mime_type
        .as_deref()
        .map(|mime| {
            AttachmentType::classify(mime).ok_or((
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UNSUPPORTED_MESSAGE.to_string(),
            ))
        })
        .transpose()?;

    let stored = state
        .storage
        .save(&upload.bytes, upload.name.as_deref())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    info!(filename = stored.filename.as_str(), size = stored.size, ?kind, "upload stored");

    Ok(Json(UploadResponse {
        id: stored.id,
        filename: stored.filename,
        mime_type: upload.mime_type,
        kind,
        size: stored.size,
        url: stored.url,
    }))
}

async fn read_multipart(
    req: Request,
    state: &AppState,
    max_bytes: usize,
) -> Result<Upload, Rejection> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| bad_request("Invalid multipart payload", e))?;

    // Counts every field so a form cannot grow past the cap through its
    // non-file parts either.
    let mut budget = max_bytes.saturating_add(JSON_OVERHEAD_BYTES);
    let mut found = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request("Invalid multipart payload", e))?
    {
        let name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| bad_request("Failed to read field", e))?
        {
            if chunk.len() > budget || bytes.len() + chunk.len() > max_bytes {
                return Err(too_large());
            }
            budget -= chunk.len();
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            continue;
        }
        if found.is_some() {
            return Err((
                StatusCode::BAD_REQUEST,
                "Only one file per request is supported".to_string(),
            ));
        }
        found = Some(Upload {
            name,
            mime_type,
            bytes,
        });
    }

    found.ok_or((StatusCode::BAD_REQUEST, "No file found in multipart upload".to_string()))
}

async fn read_json(req: Request, max_bytes: usize) -> Result<Upload, Rejection> {
    let limit = max_bytes.saturating_mul(4) / 3 + JSON_OVERHEAD_BYTES;
    let body = to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| too_large())?;

    let file: UploadRequest = serde_json::from_slice(&body)
        .map_err(|e| bad_request("Expected JSON (or multipart) upload", e))?;

    let payload = strip_data_url(&file.data_base64);
    if payload.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty base64 payload".to_string()));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| bad_request("Invalid base64", e))?;

    Ok(Upload {
        name: file.filename,
        mime_type: file.mime_type,
        bytes,
    })
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Serves a stored upload inline so attachment previews can load it.
pub async fn get_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, Rejection> {
    let bytes = state.storage.read(&filename).await.map_err(|err| {
        debug!(filename = filename.as_str(), %err, "file lookup failed");
        (StatusCode::NOT_FOUND, "file_not_found".to_string())
    })?;

    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&filename))),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
