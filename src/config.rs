//! Server configuration.
//!
//! Every setting can come from a command-line flag or from its environment
//! variable; flags win. Values are validated while parsing, so a `Config`
//! that exists is usable as-is.

use crate::protocol::RespValue;
use crate::storage::{ConcurrentStore, EventLoopStore, Store};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "tidekv", version, about = "In-memory key-value server speaking RESP")]
pub struct Config {
    /// Address to bind to (IP address or hostname)
    #[arg(long, env = "TIDEKV_HOST", default_value = DEFAULT_HOST, value_parser = parse_host)]
    pub host: String,

    /// Port to listen on
    #[arg(
        short,
        long,
        env = "TIDEKV_PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: u16,

    /// Minimum level of log messages
    #[arg(
        long,
        env = "TIDEKV_LOG_LEVEL",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    pub log_level: LogLevel,

    /// Store concurrency strategy
    #[arg(long, env = "TIDEKV_STORE", value_enum, default_value_t = StoreKind::Concurrent)]
    pub store: StoreKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: LogLevel::Info,
            store: StoreKind::Concurrent,
        }
    }
}

impl Config {
    /// `host:port` in the form `TcpListener::bind` accepts.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Levels selectable with `--log-level`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Which [`Store`] implementation backs the server.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Sharded map; operations on different keys run in parallel
    Concurrent,
    /// Single task owning all state; operations are totally ordered
    EventLoop,
}

impl StoreKind {
    /// Starts a store of this kind. Requires a Tokio runtime.
    pub fn open(self) -> Arc<dyn Store<RespValue>> {
        match self {
            StoreKind::Concurrent => Arc::new(ConcurrentStore::<RespValue>::new()),
            StoreKind::EventLoop => Arc::new(EventLoopStore::<RespValue>::new()),
        }
    }
}

/// Accepts an IP address or an RFC 1123 hostname.
fn parse_host(s: &str) -> Result<String, String> {
    if s.parse::<IpAddr>().is_ok() || is_hostname(s) {
        Ok(s.to_string())
    } else {
        Err(format!("'{s}' is not an IP address or hostname"))
    }
}

fn is_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
