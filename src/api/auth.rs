use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};
use axum_extra::typed_header::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use tracing::debug;

use crate::{auth::AuthSession, ws::AppState};

/// Caller resolved from an `Authorization: Bearer` header.
pub struct Authenticated(pub AuthSession);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| (StatusCode::UNAUTHORIZED, "login_required".to_string()))?;

        let session = state
            .services
            .auth
            .get_session(bearer.token())
            .await
            .map_err(|err| {
                debug!(%err, "bearer token rejected");
                (StatusCode::UNAUTHORIZED, "invalid_token".to_string())
            })?;

        Ok(Self(session))
    }
}
