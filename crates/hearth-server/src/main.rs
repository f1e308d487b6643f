use anyhow::Result;
use axum::{routing::get, Json, Router};
use clap::Parser;
use hearth_core::{AppConfig, AppState};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hearth=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;

    // CLI --bind overrides config file
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    ensure_data_dirs(&config);

    let db = hearth_db::create_pool(&config.database.url, config.database.max_connections).await?;
    hearth_db::run_migrations(&db).await?;

    let state = AppState::new(
        db,
        AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            token_expiry_seconds: config.auth.token_expiry_seconds,
        },
    );

    let app = Router::new()
        .merge(hearth_ws::gateway_router())
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("Gateway listening on {}", config.server.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Create the SQLite data directory on first run so the pool can open the
/// database file.
fn ensure_data_dirs(config: &config::Config) {
    let url = &config.database.url;
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return;
    };
    let path = rest.split('?').next().unwrap_or(rest);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create data directory {:?}: {}", parent, err);
            }
        }
    }
}
