//! Client sessions.
//!
//! Each accepted socket gets its own task running a [`ConnectionHandler`].
//! Sessions share nothing but the [`CommandHandler`](crate::commands::CommandHandler)
//! and, through it, the store.
//!
//! ```ignore
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
