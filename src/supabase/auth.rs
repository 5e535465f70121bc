use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{eq, SupabaseClient};
use crate::{
    auth::{AuthSession, Authenticator, SignUpMetadata},
    model::user::{ProfileUpdate, UserProfile},
};

/// GoTrue email/password auth plus the `profiles` table.
pub struct SupabaseAuth {
    client: SupabaseClient,
}

impl SupabaseAuth {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Authenticator for SupabaseAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<AuthSession>> {
        let body = json!({
            "email": email,
            "password": password,
            "data": {
                "full_name": metadata.full_name.trim(),
                "university": metadata.university.trim(),
                "program": metadata.program.trim(),
            }
        });
        let request = self
            .client
            .request(Method::POST, &self.client.auth_url("signup"), None)
            .json(&body);
        let value = self.client.send(request).await?;

        let session = session_from_token_response(&value);
        info!(confirmed = session.is_some(), "supabase sign up");
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let request = self
            .client
            .request(
                Method::POST,
                &self.client.auth_url("token?grant_type=password"),
                None,
            )
            .json(&json!({ "email": email, "password": password }));
        let value = self.client.send(request).await?;

        session_from_token_response(&value).ok_or_else(|| anyhow!("Invalid login response"))
    }

    async fn sign_out(&self, session: &AuthSession) -> Result<()> {
        let request = self.client.request(
            Method::POST,
            &self.client.auth_url("logout"),
            Some(&session.access_token),
        );
        self.client.send(request).await?;
        debug!(user_id = session.user_id.as_str(), "supabase sign out");
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<AuthSession> {
        let request = self
            .client
            .request(Method::GET, &self.client.auth_url("user"), Some(token));
        let user = self.client.send(request).await?;

        let user_id = user["id"]
            .as_str()
            .ok_or_else(|| anyhow!("invalid_token"))?
            .to_string();
        Ok(AuthSession {
            user_id,
            email: user["email"].as_str().map(str::to_string),
            access_token: token.to_string(),
        })
    }

    async fn get_profile(&self, session: &AuthSession) -> Result<Option<UserProfile>> {
        let request = self
            .client
            .request(
                Method::GET,
                &self.client.rest_url("profiles"),
                Some(&session.access_token),
            )
            .query(&[("id", eq(&session.user_id)), ("select", "*".to_string())]);
        let rows = self.client.send(request).await?;

        let Some(row) = rows.as_array().and_then(|rows| rows.first()) else {
            return Ok(None);
        };
        let mut profile: UserProfile = serde_json::from_value(row.clone())?;
        if profile.email.is_none() {
            profile.email = session.email.clone();
        }
        Ok(Some(profile))
    }

    async fn update_profile(&self, session: &AuthSession, update: &ProfileUpdate) -> Result<()> {
        let request = self
            .client
            .request(
                Method::PATCH,
                &self.client.rest_url("profiles"),
                Some(&session.access_token),
            )
            .query(&[("id", eq(&session.user_id))])
            .json(update);
        self.client.send(request).await?;
        Ok(())
    }
}

/// Session out of a GoTrue token/sign-up response; `None` when the response
/// holds only the user (confirmation pending).
pub fn session_from_token_response(value: &Value) -> Option<AuthSession> {
    let access_token = value["access_token"].as_str()?;
    let user = &value["user"];
    Some(AuthSession {
        user_id: user["id"].as_str()?.to_string(),
        email: user["email"].as_str().map(str::to_string),
        access_token: access_token.to_string(),
    })
}
