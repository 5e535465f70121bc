use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::model::user::{ProfileUpdate, UserProfile};

pub mod catalog;
pub mod email_auth;
pub mod types;
pub mod utils;

pub use email_auth::LocalAuth;
pub use types::{AuthSession, SignUpMetadata};

pub const AUTO_LOGIN_FAILED: &str =
    "Account created, but automatic login failed. Please check if email confirmation is required.";

/// Email/password accounts plus the profile record attached to each.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Create an account. `None` means the backend created the user without
    /// opening a session (e.g. email confirmation pending).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<AuthSession>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self, session: &AuthSession) -> Result<()>;

    /// Resolve a bearer token into the session it belongs to.
    async fn get_session(&self, token: &str) -> Result<AuthSession>;

    async fn get_profile(&self, session: &AuthSession) -> Result<Option<UserProfile>>;

    async fn update_profile(&self, session: &AuthSession, update: &ProfileUpdate) -> Result<()>;
}

/// Sign up, then sign in straight away when the backend did not open a session.
pub async fn register_and_sign_in(
    auth: &dyn Authenticator,
    email: &str,
    password: &str,
    metadata: &SignUpMetadata,
) -> Result<AuthSession> {
    let email = utils::normalize_email(email);
    utils::validate_credentials(&email, password)?;
    utils::validate_metadata(metadata)?;

    if let Some(session) = auth.sign_up(&email, password, metadata).await? {
        return Ok(session);
    }

    auth.sign_in(&email, password).await.map_err(|err| {
        warn!(%err, "automatic sign in after sign up failed");
        anyhow!(AUTO_LOGIN_FAILED)
    })
}

/// Plain sign in with the same email normalization as sign up.
pub async fn sign_in(auth: &dyn Authenticator, email: &str, password: &str) -> Result<AuthSession> {
    auth.sign_in(&utils::normalize_email(email), password).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that never returns a session from sign up.
    struct ConfirmFirst {
        allow_sign_in: bool,
        sign_ins: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for ConfirmFirst {
        async fn sign_up(&self, _: &str, _: &str, _: &SignUpMetadata) -> Result<Option<AuthSession>> {
            Ok(None)
        }

        async fn sign_in(&self, email: &str, _: &str) -> Result<AuthSession> {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
            if !self.allow_sign_in {
                bail!("Email not confirmed");
            }
            Ok(AuthSession {
                user_id: "u1".into(),
                email: Some(email.into()),
                access_token: "tok".into(),
            })
        }

        async fn sign_out(&self, _: &AuthSession) -> Result<()> {
            Ok(())
        }

        async fn get_session(&self, _: &str) -> Result<AuthSession> {
            bail!("unused")
        }

        async fn get_profile(&self, _: &AuthSession) -> Result<Option<UserProfile>> {
            Ok(None)
        }

        async fn update_profile(&self, _: &AuthSession, _: &ProfileUpdate) -> Result<()> {
            Ok(())
        }
    }

    fn metadata() -> SignUpMetadata {
        SignUpMetadata {
            full_name: "Mwila Banda".into(),
            university: "Mulungushi University (MU)".into(),
            program: "Bachelor in Engineering".into(),
        }
    }

    #[tokio::test]
    async fn missing_session_triggers_sign_in() {
        let auth = ConfirmFirst {
            allow_sign_in: true,
            sign_ins: AtomicUsize::new(0),
        };
        let session = register_and_sign_in(&auth, "MWILA@uni.zm", "secret1", &metadata())
            .await
            .unwrap();
        assert_eq!(session.email.as_deref(), Some("mwila@uni.zm"));
        assert_eq!(auth.sign_ins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_auto_login_reports_confirmation_hint() {
        let auth = ConfirmFirst {
            allow_sign_in: false,
            sign_ins: AtomicUsize::new(0),
        };
        let err = register_and_sign_in(&auth, "mwila@uni.zm", "secret1", &metadata())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AUTO_LOGIN_FAILED);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_backend() {
        let auth = ConfirmFirst {
            allow_sign_in: true,
            sign_ins: AtomicUsize::new(0),
        };
        assert!(register_and_sign_in(&auth, "not-an-email", "secret1", &metadata())
            .await
            .is_err());
        assert_eq!(auth.sign_ins.load(Ordering::SeqCst), 0);
    }
}
