mod app;
mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod response;
mod services;

use std::sync::Arc;

use app::{AppState, build_router, cors_layer};
use config::{Config, StorageBackend};
use db::repositories::memory::InMemoryUserRepository;
use db::repositories::user_repository::{PgUserRepository, UserRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(
            "info,identity_service=debug,hyper_util=warn,tower_http=info",
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn user_store(config: &Config) -> anyhow::Result<Arc<dyn UserRepository>> {
    match config.storage {
        StorageBackend::Postgres => {
            let pool = db::connection::create_pool(&config.database_url, config.db_pool_size)?;
            tracing::info!(max_size = config.db_pool_size, "Database pool ready");
            Ok(Arc::new(PgUserRepository::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory user store, data is lost on restart");
            Ok(Arc::new(InMemoryUserRepository::new()))
        }
    }
}

// ----------------- Main -----------------

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    setup_logging();
    tracing::info!("Starting identity-service...");

    let config = Config::from_env()?;
    let users = user_store(&config)?;
    let state = AppState::from_config(users, &config);
    let app = build_router(state).layer(cors_layer(&config.frontend_url)?);

    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        tracing::info!("Running in Lambda mode");
        lambda_http::run(app).await
    } else {
        tracing::info!("Running in local HTTP server mode");
        let addr = format!("{}:{}", config.server_host, config.server_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("🚀 Server running at http://{}", addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
