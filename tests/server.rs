//! End-to-end tests over TCP, one server per store strategy.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tidekv::config::StoreKind;
use tidekv::protocol::{parse_message, RespValue};
use tidekv::{server, CommandHandler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;

const KINDS: [StoreKind; 2] = [StoreKind::Concurrent, StoreKind::EventLoop];

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(kind: StoreKind) -> Self {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = assert_ok!(listener.local_addr());
        let store = kind.open();
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server::run(listener, CommandHandler::new(store.clone()), stopped).await;
            store.shutdown().await;
        });

        Self { addr, stop, task }
    }

    async fn client(&self) -> Client {
        Client {
            stream: assert_ok!(TcpStream::connect(self.addr).await),
            buffer: BytesMut::new(),
        }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        assert_ok!(self.task.await);
    }
}

struct Client {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Client {
    async fn send(&mut self, parts: &[&str]) {
        let frame = RespValue::array(
            parts
                .iter()
                .map(|p| RespValue::bulk_string(p.as_bytes().to_vec()))
                .collect(),
        );
        assert_ok!(self.stream.write_all(&frame.serialize()).await);
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        assert_ok!(self.stream.write_all(bytes).await);
    }

    /// Raw bytes of the next complete reply frame.
    async fn reply(&mut self) -> Vec<u8> {
        loop {
            if let Some((_, used)) = assert_ok!(parse_message(&self.buffer)) {
                return self.buffer.split_to(used).to_vec();
            }
            let n = assert_ok!(
                tokio::time::timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buffer))
                    .await
                    .map_err(|_| "timed out waiting for reply")
            );
            let n = assert_ok!(n);
            assert!(n > 0, "server closed the connection");
        }
    }

    async fn call(&mut self, parts: &[&str]) -> Vec<u8> {
        self.send(parts).await;
        self.reply().await
    }

    /// True once the server has closed its end.
    async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

#[tokio::test]
async fn set_get_del_round_trip() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(client.call(&["SET", "foo", "bar"]).await, b"+OK\r\n");
        assert_eq!(client.call(&["GET", "foo"]).await, b"$3\r\nbar\r\n");
        assert_eq!(client.call(&["GET", "nope"]).await, b"$-1\r\n");
        assert_eq!(client.call(&["DEL", "foo", "nope"]).await, b":1\r\n");
        assert_eq!(client.call(&["GET", "foo"]).await, b"$-1\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn conditional_set_and_get_option() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(client.call(&["SET", "k", "1", "XX"]).await, b"$-1\r\n");
        assert_eq!(client.call(&["SET", "k", "1", "nx"]).await, b"+OK\r\n");
        assert_eq!(client.call(&["SET", "k", "2", "NX"]).await, b"$-1\r\n");
        assert_eq!(client.call(&["SET", "k", "3", "GET"]).await, b"$1\r\n1\r\n");
        assert_eq!(client.call(&["SET", "new", "x", "GET"]).await, b"$-1\r\n");
        assert_eq!(client.call(&["GET", "k"]).await, b"$1\r\n3\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn keys_expire() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(client.call(&["SET", "ttl", "v", "PX", "100"]).await, b"+OK\r\n");
        assert_eq!(client.call(&["GET", "ttl"]).await, b"$1\r\nv\r\n");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.call(&["GET", "ttl"]).await, b"$-1\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn command_errors_keep_the_session_open() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(
            client.call(&["FLUSHALL"]).await,
            b"-ERR unsupported command 'FLUSHALL'\r\n"
        );
        assert_eq!(
            client.call(&["GET"]).await,
            b"-ERR wrong number of arguments for 'GET' command\r\n"
        );
        assert_eq!(
            client.call(&["SET", "k", "v", "NX", "XX"]).await,
            b"-ERR syntax error: NX and XX options cannot be used together\r\n"
        );
        assert_eq!(client.call(&["SET", "k", "v"]).await, b"+OK\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        client
            .send_raw(
                b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
                  *2\r\n$3\r\nGET\r\n$1\r\na\r\n\
                  *2\r\n$3\r\nDEL\r\n$1\r\na\r\n",
            )
            .await;
        assert_eq!(client.reply().await, b"+OK\r\n");
        assert_eq!(client.reply().await, b"$1\r\n1\r\n");
        assert_eq!(client.reply().await, b":1\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn malformed_frame_closes_the_session() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        client.send_raw(b"*abc\r\n").await;
        let reply = client.reply().await;
        assert!(reply.starts_with(b"-ERR "), "{:?}", String::from_utf8_lossy(&reply));
        assert!(client.is_closed().await);

        // Other clients are unaffected.
        let mut other = server.client().await;
        assert_eq!(other.call(&["SET", "k", "v"]).await, b"+OK\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn clients_share_one_store() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut writer = server.client().await;
        let mut reader = server.client().await;

        assert_eq!(writer.call(&["SET", "shared", "yes"]).await, b"+OK\r\n");
        assert_eq!(reader.call(&["GET", "shared"]).await, b"$3\r\nyes\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn command_lists_supported_names() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(
            client.call(&["COMMAND"]).await,
            b"*4\r\n$7\r\nCOMMAND\r\n$3\r\nDEL\r\n$3\r\nGET\r\n$3\r\nSET\r\n"
        );

        server.stop().await;
    }
}

#[tokio::test]
async fn large_values_round_trip() {
    let value = "x".repeat(200 * 1024);
    let expected = format!("${}\r\n{}\r\n", value.len(), value).into_bytes();

    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(client.call(&["SET", "big", value.as_str()]).await, b"+OK\r\n");
        assert_eq!(client.call(&["GET", "big"]).await, expected);

        server.stop().await;
    }
}

#[tokio::test]
async fn overflowing_expire_is_a_syntax_error() {
    let max = i64::MAX.to_string();

    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        for unit in ["EX", "PX"] {
            assert_eq!(
                client.call(&["SET", "k", "v", unit, max.as_str()]).await,
                b"-ERR syntax error: invalid expire time\r\n"
            );
        }
        assert_eq!(client.call(&["SET", "k", "v"]).await, b"+OK\r\n");

        let mut other = server.client().await;
        assert_eq!(other.call(&["GET", "k"]).await, b"$1\r\nv\r\n");

        server.stop().await;
    }
}

#[tokio::test]
async fn line_breaks_in_names_stay_inside_one_reply() {
    for kind in KINDS {
        let server = TestServer::start(kind).await;
        let mut client = server.client().await;

        assert_eq!(
            client.call(&["X\r\n+OK"]).await,
            b"-ERR unsupported command 'X  +OK'\r\n"
        );
        assert_eq!(
            client.call(&["SET", "k", "v", "a\r\n:1"]).await,
            b"-ERR syntax error: unsupported option 'A  :1'\r\n"
        );
        // Nothing extra is left in the stream.
        assert_eq!(client.call(&["GET", "k"]).await, b"$-1\r\n");

        server.stop().await;
    }
}
