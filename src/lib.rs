pub mod api;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod db;
pub mod inference;
pub mod model;
pub mod prompts;
pub mod render;
pub mod session;
pub mod storage;
pub mod store;
pub mod supabase;
pub mod ws;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    auth::LocalAuth,
    config::{AppConfig, BackendKind},
    db::DBLayer,
    inference::StudyModel,
    session::Services,
    supabase::{SupabaseAuth, SupabaseClient, SupabaseStore},
    ws::AppState,
};

/// Wires the account backend picked by the config. Guest history always
/// lives in the local store.
pub fn build_services(
    config: &AppConfig,
    db: Arc<DBLayer>,
    model: Arc<dyn StudyModel>,
) -> Result<Services> {
    let services = match (config.backend(), config.supabase.as_ref()) {
        (BackendKind::Supabase, Some(supabase)) => {
            info!(url = supabase.url.as_str(), "using supabase backend");
            let client = SupabaseClient::new(supabase)?;
            Services {
                model,
                store: Arc::new(SupabaseStore::new(client.clone())),
                guest: db,
                auth: Arc::new(SupabaseAuth::new(client)),
            }
        }
        _ => {
            info!(path = %config.db_path.display(), "using local backend");
            Services {
                model,
                store: db.clone(),
                auth: Arc::new(LocalAuth::new(db.clone(), config.jwt_secret.as_str())),
                guest: db,
            }
        }
    };
    Ok(services)
}

/// Websocket plus REST routes with permissive CORS for the web client.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(ws::ws_router())
        .merge(api::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
