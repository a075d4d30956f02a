//! # tidekv
//!
//! An in-memory key-value server that speaks a subset of the Redis
//! serialization protocol (RESP) over TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                               tidekv                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌────────────────┐           │
//! │  │   server    │───>│ connection  │───>│   commands     │           │
//! │  │ accept loop │    │  session    │    │ table/dispatch │           │
//! │  └─────────────┘    └──────┬──────┘    └───────┬────────┘           │
//! │                            │                   │                    │
//! │                            ▼                   ▼                    │
//! │                     ┌─────────────┐    ┌────────────────────────┐   │
//! │                     │  protocol   │    │ storage: dyn Store     │   │
//! │                     │ RESP codec  │    │  ConcurrentStore  or   │   │
//! │                     └─────────────┘    │  EventLoopStore        │   │
//! │                                        └────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Commands
//!
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds] [NX | XX] [GET]`
//! - `DEL key [key ...]`
//! - `COMMAND`
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidekv::commands::CommandHandler;
//! use tidekv::protocol::RespValue;
//! use tidekv::storage::ConcurrentStore;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(ConcurrentStore::<RespValue>::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     tidekv::server::run(listener, CommandHandler::new(store), tokio::signal::ctrl_c()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Expiry
//!
//! Keys with a TTL are removed two ways: lazily, when an operation touches an
//! expired key, and actively, by a once-a-second sweep over the whole store.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::handle_connection;
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{ConcurrentStore, EventLoopStore, SetOptions, SetOutcome, Store, StoreError};

/// Default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address: every interface
pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
