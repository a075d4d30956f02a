//! Per-client session.
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        ▼                                              │
//!   Reading ──frame──> Dispatching ──reply──> Writing ──┘
//!     │  │
//!     │  └─ malformed frame: send error reply ──> Closed
//!     └──── clean EOF ──────────────────────────> Closed
//! ```
//!
//! Bytes accumulate in a `BytesMut` because TCP gives no frame boundaries: one
//! read may hold half a command or several pipelined ones. Every complete
//! frame already buffered is answered, in order, before the next read.
//!
//! Command errors are ordinary replies and keep the connection open. A
//! decode error means the byte stream can no longer be trusted, so the
//! session sends one error reply and hangs up.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest amount of buffered input allowed without a complete frame: one
/// maximum-size bulk string plus room for its headers.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading from the socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing a reply failed; the socket is unusable.
    #[error("failed to write reply: {0}")]
    Write(#[source] std::io::Error),

    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The client closed the connection between frames.
    #[error("client closed connection")]
    ClientDisconnected,

    /// The client closed the connection in the middle of a frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

impl ConnectionError {
    /// The error reply owed to the client before hanging up, if any.
    pub fn reply(&self) -> Option<RespValue> {
        match self {
            ConnectionError::Parse(_)
            | ConnectionError::UnexpectedEof
            | ConnectionError::BufferFull => Some(RespValue::error(self.to_string())),
            _ => None,
        }
    }
}

/// One client's read/dispatch/write loop.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: RespParser,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, addr: SocketAddr, command_handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
        }
    }

    /// Serves the client until it disconnects or breaks the protocol.
    ///
    /// Returns `Ok` for a clean disconnect.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Session started");

        let err = match self.main_loop().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match &err {
            ConnectionError::ClientDisconnected => {
                info!(client = %self.addr, "Client closed connection");
                return Ok(());
            }
            ConnectionError::Io(io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client");
            }
            ConnectionError::Write(_) => {
                error!(client = %self.addr, error = %err, "Write failed, closing session");
            }
            _ => warn!(client = %self.addr, error = %err, "Closing session"),
        }

        if let Some(reply) = err.reply() {
            if let Err(e) = self.send_response(&reply).await {
                debug!(client = %self.addr, error = %e, "Could not deliver error reply");
            }
        }

        Err(err)
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.try_parse_frame()? {
                let response = self.command_handler.execute(frame).await;
                self.send_response(&response).await?;
            }

            self.read_more_data().await?;
        }
    }

    fn try_parse_frame(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(value))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream
            .write_all(&bytes)
            .await
            .map_err(ConnectionError::Write)?;
        self.stream.flush().await.map_err(ConnectionError::Write)?;
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Runs a session to completion.
///
/// [`ConnectionHandler::run`] has already logged the reason by the time an
/// error comes back, so only the outcome is traced here.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, command_handler: CommandHandler) {
    match ConnectionHandler::new(stream, addr, command_handler).run().await {
        Ok(()) => trace!(client = %addr, "Session finished"),
        Err(e) => trace!(client = %addr, error = %e, "Session aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ConcurrentStore;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn create_test_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = CommandHandler::new(Arc::new(ConcurrentStore::<RespValue>::new()));

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, client_addr, handler.clone()));
            }
        });

        addr
    }

    async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn expect_closed(client: &mut TcpStream) {
        let mut rest = Vec::new();
        match client.read_to_end(&mut rest).await {
            Ok(_) => assert!(rest.is_empty(), "unexpected bytes: {:?}", rest),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }
    }

    #[tokio::test]
    async fn test_set_get() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\ntide\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$4\r\ntide\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        expect_reply(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n").await;
    }

    #[tokio::test]
    async fn test_split_frame() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$3\r\nGE").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(b"T\r\n$4\r\nnone\r\n").await.unwrap();

        expect_reply(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"+PING\r\n").await.unwrap();
        expect_reply(&mut client, b"-ERR command must be an array\r\n").await;

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect_reply(&mut client, b"-ERR unsupported command 'PING'\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_decode_error_closes_connection() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*abc\r\n*1\r\n$7\r\nCOMMAND\r\n")
            .await
            .unwrap();

        expect_reply(
            &mut client,
            b"-ERR parse array length failed: invalid digit found in string\r\n",
        )
        .await;
        expect_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let addr = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        expect_reply(&mut client, b"-ERR unexpected end of stream\r\n").await;
        expect_closed(&mut client).await;
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(ConnectionError::ClientDisconnected.reply(), None);
        assert_eq!(
            ConnectionError::BufferFull.reply(),
            Some(RespValue::error("buffer size limit exceeded"))
        );
        assert_eq!(
            ConnectionError::Parse(ParseError::UnsupportedType('@')).reply(),
            Some(RespValue::error("unsupported RESP type: '@'"))
        );
    }
}
