use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learnova::{
    config::AppConfig, db::DBLayer, inference::GeminiClient, storage::StorageService,
    ws::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚀 Starting Learnova AI server...");

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let config = AppConfig::from_env()?;
    let db = Arc::new(DBLayer::new(&config.db_path)?);
    let storage = Arc::new(StorageService::new(&config.storage_dir).await?);
    let model = Arc::new(GeminiClient::new(&config.gemini)?);
    let services = learnova::build_services(&config, db, model)?;

    let addr = config.addr.clone();
    let state = AppState {
        config: Arc::new(config),
        storage,
        services,
    };

    let app = learnova::app(state);

    println!("🌐 HTTP listening on http://{addr}");
    println!("🔌 WebSocket at ws://{addr}/ws");
    println!("🛠 REST API at http://{addr}/api");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
