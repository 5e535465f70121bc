use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use super::{
    auth::Authenticated,
    types::{
        ChatsResponse, GuestHistoryResponse, MessagesResponse, RenderRequest, RenderResponse,
        SessionResponse, StatusResponse,
    },
};
use crate::{
    auth::{
        self,
        catalog::{self, Catalog},
        types::{AuthResponse, SignInRequest, SignUpRequest},
        SignUpMetadata,
    },
    model::user::{ProfileUpdate, UserProfile},
    render::{format_time, render_markdown},
    ws::AppState,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    error!(%err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

// ============================================================
// AUTH
// ============================================================
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> ApiResult<AuthResponse> {
    let metadata = SignUpMetadata {
        full_name: req.full_name,
        university: req.university,
        program: req.program,
    };

    let session =
        auth::register_and_sign_in(state.services.auth.as_ref(), &req.email, &req.password, &metadata)
            .await
            .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    info!(user_id = session.user_id.as_str(), "signed up");
    Ok(Json(session.into()))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> ApiResult<AuthResponse> {
    let session = auth::sign_in(state.services.auth.as_ref(), &req.email, &req.password)
        .await
        .map_err(|err| (StatusCode::UNAUTHORIZED, err.to_string()))?;
    Ok(Json(session.into()))
}

pub async fn sign_out(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
) -> ApiResult<StatusResponse> {
    state
        .services
        .auth
        .sign_out(&session)
        .await
        .map_err(internal)?;
    Ok(Json(StatusResponse { ok: true }))
}

pub async fn current_session(Authenticated(session): Authenticated) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: session.user_id,
        email: session.email,
    })
}

// ============================================================
// PROFILE
// ============================================================
pub async fn get_profile(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
) -> ApiResult<UserProfile> {
    state
        .services
        .auth
        .get_profile(&session)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "profile_not_found".to_string()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<UserProfile> {
    if update.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "nothing_to_update".into()));
    }

    let auth = &state.services.auth;
    auth.update_profile(&session, &update)
        .await
        .map_err(internal)?;

    let profile = auth
        .get_profile(&session)
        .await
        .map_err(internal)?
        .unwrap_or_else(|| {
            let mut profile = UserProfile {
                id: session.user_id.clone(),
                email: session.email.clone(),
                ..Default::default()
            };
            update.apply(&mut profile);
            profile
        });
    Ok(Json(profile))
}

// ============================================================
// CHATS
// ============================================================
pub async fn list_chats(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
) -> ApiResult<ChatsResponse> {
    let chats = state
        .services
        .store
        .get_chats(&session)
        .await
        .map_err(internal)?;
    Ok(Json(ChatsResponse { chats }))
}

pub async fn clear_chats(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
) -> ApiResult<StatusResponse> {
    state
        .services
        .store
        .clear_history(&session)
        .await
        .map_err(internal)?;
    Ok(Json(StatusResponse { ok: true }))
}

pub async fn list_messages_for_chat(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Path(chat_id): Path<String>,
) -> ApiResult<MessagesResponse> {
    let messages = state
        .services
        .store
        .get_messages(&session, &chat_id)
        .await
        .map_err(chat_error)?;

    Ok(Json(MessagesResponse { chat_id, messages }))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Path(chat_id): Path<String>,
) -> ApiResult<StatusResponse> {
    state
        .services
        .store
        .delete_chat(&session, &chat_id)
        .await
        .map_err(chat_error)?;
    Ok(Json(StatusResponse { ok: true }))
}

fn chat_error(err: anyhow::Error) -> (StatusCode, String) {
    if err.to_string() == "chat_not_found" {
        (StatusCode::NOT_FOUND, "chat_not_found".into())
    } else {
        internal(err)
    }
}

// ============================================================
// GUEST HISTORY
// ============================================================
pub async fn guest_history(
    State(state): State<AppState>,
    Path(device_hash): Path<String>,
) -> ApiResult<GuestHistoryResponse> {
    let chats = state
        .services
        .guest
        .load(&device_hash)
        .await
        .map_err(internal)?;
    Ok(Json(GuestHistoryResponse { device_hash, chats }))
}

pub async fn clear_guest_history(
    State(state): State<AppState>,
    Path(device_hash): Path<String>,
) -> ApiResult<StatusResponse> {
    state
        .services
        .guest
        .clear(&device_hash)
        .await
        .map_err(internal)?;
    Ok(Json(StatusResponse { ok: true }))
}

// ============================================================
// MISC
// ============================================================
pub async fn catalog() -> Json<Catalog> {
    Json(catalog::catalog())
}

pub async fn render(Json(req): Json<RenderRequest>) -> Json<RenderResponse> {
    Json(RenderResponse {
        html: render_markdown(&req.text),
        time: req.timestamp.map(format_time),
    })
}

pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse { ok: true })
}
