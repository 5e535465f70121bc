use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::error;

use crate::config::SupabaseConfig;

pub mod auth;
pub mod rest;

pub use auth::SupabaseAuth;
pub use rest::SupabaseStore;

/// Thin wrapper over a Supabase project's GoTrue and PostgREST endpoints.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Supabase http client")?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        })
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    pub(crate) fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    /// Request carrying the project key, authorised as `token` (or anonymously).
    pub(crate) fn request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key))
    }

    /// Send and decode the JSON body; an empty body decodes as `Null`.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("supabase request failed")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = error_message(&text);
            error!(status = status.as_u16(), message = message.as_str(), "supabase error");
            bail!(message);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("invalid supabase response")
    }
}

/// PostgREST equality filter value. Pass it through `RequestBuilder::query`
/// so ids are percent-encoded and cannot add filters of their own.
pub(crate) fn eq(value: &str) -> String {
    format!("eq.{value}")
}

/// Human-readable error from a GoTrue or PostgREST error body.
pub fn error_message(body: &str) -> String {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|key| parsed[*key].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                "supabase request failed".to_string()
            } else {
                body.chars().take(200).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        SupabaseClient::new(&SupabaseConfig {
            url: "https://demo.supabase.co/".into(),
            anon_key: "anon".into(),
        })
        .unwrap()
    }

    #[test]
    fn urls_are_built_from_project_root() {
        let c = client();
        assert_eq!(
            c.auth_url("token?grant_type=password"),
            "https://demo.supabase.co/auth/v1/token?grant_type=password"
        );
        assert_eq!(c.rest_url("chats"), "https://demo.supabase.co/rest/v1/chats");
    }

    #[test]
    fn error_bodies_are_summarised() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(error_message(""), "supabase request failed");
        assert_eq!(error_message("upstream down"), "upstream down");
    }
}
