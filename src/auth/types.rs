use serde::{Deserialize, Serialize};

/// A signed-in user as seen by the stores and the chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub access_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub full_name: String,
    pub university: String,
    pub program: String,
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub university: String,
    pub program: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user_id: String,
    pub email: Option<String>,
}

impl From<AuthSession> for AuthResponse {
    fn from(session: AuthSession) -> Self {
        Self {
            access_token: session.access_token,
            user_id: session.user_id,
            email: session.email,
        }
    }
}
