// crates/server/src/main.rs
//! Jobtail server binary.
//!
//! Opens the event log database, starts the Axum HTTP server, and spawns the
//! cleanup supervisor that seals stalled jobs and reclaims expired logs.

use std::net::SocketAddr;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jobtail_server::{cleanup, create_app, AppState, Config};
use jobtail_store::Database;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (quiet by default — startup UX uses eprintln)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env();

    // Print banner
    eprintln!("\n\u{1f4e1} jobtail v{}\n", env!("CARGO_PKG_VERSION"));

    // Step 1: Open the event log database
    let db = Database::open_default().await?;
    eprintln!("  \u{2713} Event log at {}", db.path().display());

    // Step 2: Build shared state and the Axum app
    let port = config.port;
    let state = AppState::with_config(db, config);
    let app = create_app(state.clone());

    // Step 3: Spawn the cleanup supervisor
    cleanup::spawn(state);

    // Step 4: Bind and serve
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("  \u{2192} http://localhost:{}\n", port);

    axum::serve(listener, app).await?;

    Ok(())
}
