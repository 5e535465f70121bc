use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    types::{AuthSession, SignUpMetadata},
    utils::{create_jwt, decode_jwt, hash_password, verify_password},
    Authenticator,
};
use crate::{
    db::DBLayer,
    model::{
        now_ms,
        user::{LocalUser, ProfileUpdate, UserProfile},
    },
};

/// Email/password accounts kept in the embedded store, HS256 bearer tokens.
pub struct LocalAuth {
    db: Arc<DBLayer>,
    jwt_secret: String,
}

impl LocalAuth {
    pub fn new(db: Arc<DBLayer>, jwt_secret: impl Into<String>) -> Self {
        Self {
            db,
            jwt_secret: jwt_secret.into(),
        }
    }

    fn issue(&self, user: &LocalUser) -> Result<AuthSession> {
        Ok(AuthSession {
            user_id: user.id.clone(),
            email: Some(user.email.clone()),
            access_token: create_jwt(&user.id, Some(&user.email), &self.jwt_secret)?,
        })
    }
}

#[async_trait]
impl Authenticator for LocalAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<AuthSession>> {
        if self.db.find_user_by_email(email).await?.is_some() {
            bail!("Email already registered");
        }

        let user = LocalUser {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            created_ts: now_ms(),
        };
        self.db.save_user(&user).await?;

        self.db
            .save_profile(&UserProfile {
                id: user.id.clone(),
                email: Some(user.email.clone()),
                full_name: Some(metadata.full_name.trim().to_string()),
                university: Some(metadata.university.trim().to_string()),
                program: Some(metadata.program.trim().to_string()),
            })
            .await?;

        info!(user_id = user.id.as_str(), "local account created");
        self.issue(&user).map(Some)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let user = self
            .db
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| anyhow!("Invalid credentials"))?;

        if !verify_password(&user.password_hash, password)? {
            bail!("Invalid credentials");
        }

        self.issue(&user)
    }

    async fn sign_out(&self, session: &AuthSession) -> Result<()> {
        // Tokens are stateless; the client drops its copy.
        debug!(user_id = session.user_id.as_str(), "local sign out");
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<AuthSession> {
        let claims = decode_jwt(token, &self.jwt_secret)?;
        let user = self
            .db
            .load_user(&claims.sub)
            .await?
            .ok_or_else(|| anyhow!("user_not_found"))?;

        Ok(AuthSession {
            user_id: user.id,
            email: Some(user.email),
            access_token: token.to_string(),
        })
    }

    async fn get_profile(&self, session: &AuthSession) -> Result<Option<UserProfile>> {
        self.db.load_profile(&session.user_id).await
    }

    async fn update_profile(&self, session: &AuthSession, update: &ProfileUpdate) -> Result<()> {
        let mut profile = self
            .db
            .load_profile(&session.user_id)
            .await?
            .unwrap_or_else(|| UserProfile {
                id: session.user_id.clone(),
                email: session.email.clone(),
                ..Default::default()
            });
        update.apply(&mut profile);
        self.db.save_profile(&profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::register_and_sign_in;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalAuth) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(DBLayer::new(dir.path().join("db")).unwrap());
        (dir, LocalAuth::new(db, "test-secret"))
    }

    fn metadata() -> SignUpMetadata {
        SignUpMetadata {
            full_name: "Jane Doe".into(),
            university: "University of Zambia (UNZA)".into(),
            program: "Bachelor in Economics".into(),
        }
    }

    #[tokio::test]
    async fn sign_up_creates_profile_and_session() {
        let (_dir, auth) = setup();
        let session = register_and_sign_in(&auth, " Jane@Example.com ", "secret1", &metadata())
            .await
            .unwrap();
        assert_eq!(session.email.as_deref(), Some("jane@example.com"));

        let resolved = auth.get_session(&session.access_token).await.unwrap();
        assert_eq!(resolved.user_id, session.user_id);

        let profile = auth.get_profile(&session).await.unwrap().unwrap();
        assert_eq!(profile.program.as_deref(), Some("Bachelor in Economics"));
    }

    #[tokio::test]
    async fn duplicate_email_and_bad_password_are_rejected() {
        let (_dir, auth) = setup();
        register_and_sign_in(&auth, "jane@example.com", "secret1", &metadata())
            .await
            .unwrap();

        let err = register_and_sign_in(&auth, "jane@example.com", "secret1", &metadata())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");

        let err = auth.sign_in("jane@example.com", "wrong-pass").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert!(auth.sign_in("jane@example.com", "secret1").await.is_ok());
    }

    #[tokio::test]
    async fn profile_update_merges_fields() {
        let (_dir, auth) = setup();
        let session = register_and_sign_in(&auth, "jane@example.com", "secret1", &metadata())
            .await
            .unwrap();

        auth.update_profile(
            &session,
            &ProfileUpdate {
                university: Some("Palabana University".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let profile = auth.get_profile(&session).await.unwrap().unwrap();
        assert_eq!(profile.university.as_deref(), Some("Palabana University"));
        assert_eq!(profile.full_name.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let (_dir, auth) = setup();
        assert!(auth.get_session("not-a-token").await.is_err());
    }
}
