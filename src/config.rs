use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::warn;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Accounts, chats and messages in the embedded rocksdb store.
    Local,
    /// Accounts and rows in a Supabase project.
    Supabase,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: String,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub gemini: GeminiConfig,
    pub supabase: Option<SupabaseConfig>,
    pub jwt_secret: String,
    pub max_attachment_bytes: usize,
}

impl AppConfig {
    /// Reads the process environment (after `.env`, if any, was loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(api_key) = get("GEMINI_API_KEY").or_else(|| get("API_KEY")) else {
            bail!("GEMINI_API_KEY (or API_KEY) must be set");
        };

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_ANON_KEY")) {
            (Some(url), Some(anon_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("SUPABASE_URL and SUPABASE_ANON_KEY must both be set; using local backend");
                None
            }
            (None, None) => None,
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            if supabase.is_none() {
                warn!("JWT_SECRET not set; local tokens use an insecure development secret");
            }
            "learnova-dev-secret".to_string()
        });

        Ok(Self {
            addr: get("LEARNOVA_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            db_path: get("LEARNOVA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("learnova.db")),
            storage_dir: get("LEARNOVA_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            gemini: GeminiConfig {
                api_key,
                model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: get("GEMINI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
                timeout_secs: parse_or(
                    "GEMINI_TIMEOUT_SECS",
                    get("GEMINI_TIMEOUT_SECS"),
                    DEFAULT_GEMINI_TIMEOUT_SECS,
                ),
            },
            supabase,
            jwt_secret,
            max_attachment_bytes: parse_or(
                "MAX_ATTACHMENT_BYTES",
                get("MAX_ATTACHMENT_BYTES"),
                DEFAULT_MAX_ATTACHMENT_BYTES,
            ),
        })
    }

    pub fn backend(&self) -> BackendKind {
        if self.supabase.is_some() {
            BackendKind::Supabase
        } else {
            BackendKind::Local
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = raw.as_str(), %default, "invalid number; using default");
            default
        }),
        None => default,
    }
}
