//! Accept loop.

use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Accepts connections until `shutdown` completes, spawning one session task
/// per socket. Sessions already running are left to finish on their own.
pub async fn run(listener: TcpListener, handler: CommandHandler, shutdown: impl Future) {
    tokio::select! {
        _ = accept_loop(&listener, handler) => {}
        _ = shutdown => {
            info!("Shutdown signal received, no longer accepting connections");
        }
    }
}

/// A failed accept only affects that one connection attempt, so the error is
/// logged and the loop keeps going.
async fn accept_loop(listener: &TcpListener, handler: CommandHandler) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(client = %addr, "Accepted connection");
                tokio::spawn(handle_connection(stream, addr, handler.clone()));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
