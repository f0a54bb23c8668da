use std::sync::Arc;

use agora::{chat, config::Config, db, AppState};
use axum::{http::HeaderValue, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agora=info")),
        )
        .init();

    let db_pool = db::connect(&config.database_url).await?;
    db::init_schema(&db_pool).await?;
    info!(database = %config.database_url, "database ready");

    let hub = Arc::new(chat::hub::ChatHub::new(
        chat::store::MessageStore::new(db_pool.clone()),
        chat::presence::PresenceRegistry::new(),
    ));
    tokio::spawn(chat::hub::run_sweeper(hub.clone()));

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(hello))
        .nest("/api/chat", chat::router())
        .layer(cors)
        .with_state(AppState { db_pool, hub });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn hello() -> &'static str {
    "agora chat service"
}
