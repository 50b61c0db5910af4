//! Newsroom server binary

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsroom::authz::{AuthorizationDirectory, RoleDirectory};
use newsroom::collab::Coordinator;
use newsroom::config::ServerConfig;
use newsroom::store::{DocumentStore, SqliteStore};
use newsroom::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    let directory: Arc<dyn AuthorizationDirectory> = match &config.roles_file {
        Some(path) => Arc::new(RoleDirectory::from_file(path)?),
        None => Arc::new(RoleDirectory::newsroom_defaults()),
    };

    // Database connection
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool));
    let coordinator = Arc::new(Coordinator::new(directory, store, config.coordinator()));
    let sweeper = coordinator.clone().spawn_stale_sweeper();

    let app = newsroom::app(AppState::new(coordinator));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
