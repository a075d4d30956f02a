//! tidekv server binary.

use anyhow::Context;
use clap::Parser;
use tidekv::{server, CommandHandler, Config};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let level = LevelFilter::from(config.log_level);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_banner(config: &Config) {
    println!(
        r#"
  _   _     _       _
 | |_(_) __| | ___ | | ____   __
 | __| |/ _` |/ _ \| |/ /\ \ / /
 | |_| | (_| |  __/|   <  \ V /
  \__|_|\__,_|\___||_|\_\  \_/

tidekv v{} - in-memory key-value server
──────────────────────────────────────────
Listening on {} ({:?} store)
Use Ctrl+C to shut down.
"#,
        tidekv::VERSION,
        config.bind_address(),
        config.store
    );
}

/// Resolves on Ctrl+C. If the handler cannot be installed the server runs
/// until killed.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config);

    let store = config.store.open();
    info!(store = ?config.store, "Store initialized");

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Listening");

    print_banner(&config);

    server::run(listener, CommandHandler::new(store.clone()), shutdown_signal()).await;

    store.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
