// Membership Fees - Web Server

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;

use membership_fees::api::{build_router, AppState};
use membership_fees::{logging, setup_database, AppConfig, CredentialTable};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(config.json_logs);

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    setup_database(&conn)?;
    tracing::info!(path = %config.database_path.display(), "database opened");

    let credentials = CredentialTable::from_file(&config.credentials_path)?;
    if credentials.is_empty() {
        tracing::warn!("credential table is empty; nobody can sign in");
    }

    let state = AppState::new(conn, Arc::new(credentials), config.monthly_fee)
        .with_session_ttl(chrono::Duration::hours(config.session_ttl_hours));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    tracing::info!(addr = %config.server_addr, "server running");
    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/health", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
