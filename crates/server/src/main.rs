//! waypost server entry point.
//!
//! Loads configuration, opens the cache store, boots the engine and serves
//! the MCP tools on stdio. Logging goes to stderr to avoid interfering with
//! the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use waypost_core::{AppConfig, CacheDb};
use waypost_engine::{Engine, FetchClient, FetchConfig};

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        version = %config.engine_version,
        origin = %config.origin,
        db_path = %config.db_path.display(),
        "starting waypost on stdio transport"
    );

    let db = CacheDb::open(&config.db_path).await.context("opening cache store")?;
    let fetcher = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let engine = Arc::new(Engine::from_config(&config, db, fetcher)?);

    // Until an install succeeds requests are forwarded uncached; the next start retries.
    if let Err(e) = engine.boot().await {
        tracing::error!(error = %e, "engine did not activate");
    }

    let handler = handler::WaypostServer::new(engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
