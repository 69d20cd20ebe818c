//! End-to-end tests for the dispatch loop over real sockets.
//!
//! Each test starts a server on an ephemeral port with its own data
//! directory and drives it with raw TCP clients speaking the JIM wire
//! format directly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use jimchat_protocol::WireCodec;
use jimchat_server::{bind_listener, Dispatcher};
use jimchat_storage::{JsonDirectory, PendingStore};
use jimchat_types::config::ServerConfig;
use jimchat_types::Result;

// ---------------------------------------------------------------------------
// Test server
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "jimchat-server-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

struct TestServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
    data_dir: PathBuf,
}

impl TestServer {
    /// Starts a dispatcher on an ephemeral loopback port.
    async fn start(data_dir: PathBuf) -> Self {
        let config = ServerConfig {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            data_dir: data_dir.clone(),
            flush_interval_ms: 50,
            ..ServerConfig::default()
        };

        let pending =
            PendingStore::open(&data_dir.join("pending.json")).expect("open pending store");
        let directory =
            JsonDirectory::open(&data_dir.join("directory.json")).expect("open directory");

        let dispatcher = Dispatcher::new(
            WireCodec::new(),
            pending,
            Box::new(directory),
            &config,
        );

        let listener = bind_listener(&config).await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(listener, shutdown_rx));

        Self {
            addr,
            shutdown,
            handle,
            data_dir,
        }
    }

    /// Signals shutdown and waits for the persist-and-close path.
    async fn stop(self) -> PathBuf {
        self.shutdown.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server stops in time")
            .expect("server task completes")
            .expect("server exits cleanly");
        self.data_dir
    }
}

// ---------------------------------------------------------------------------
// Test client
// ---------------------------------------------------------------------------

/// A raw JIM wire client. Buffers reads so that coalesced frames are
/// split back into individual JSON documents.
struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, payload: &Value) {
        let raw = serde_json::to_vec(payload).expect("serialize");
        self.stream.write_all(&raw).await.expect("write");
    }

    async fn send_raw(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.expect("write");
    }

    /// Reads the next JSON document, across frame boundaries.
    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !self.buf.is_empty() {
                    let mut frames = serde_json::Deserializer::from_slice(&self.buf)
                        .into_iter::<Value>();
                    match frames.next() {
                        Some(Ok(value)) => {
                            let consumed = frames.byte_offset();
                            self.buf.drain(..consumed);
                            return value;
                        }
                        Some(Err(e)) if e.is_eof() => {}
                        Some(Err(e)) => panic!("invalid frame from server: {e}"),
                        None => {}
                    }
                }

                let mut chunk = [0u8; 1280];
                let n = self.stream.read(&mut chunk).await.expect("read");
                assert!(n > 0, "connection closed while waiting for a frame");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("frame arrives in time")
    }

    /// Waits for the server to close this connection.
    async fn expect_closed(&mut self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut chunk = [0u8; 1280];
            loop {
                match self.stream.read(&mut chunk).await {
                    Ok(0) => return,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        })
        .await
        .expect("connection closes in time")
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

fn presence(account_name: &str) -> Value {
    json!({
        "action": "presence",
        "time": 0.0,
        "user": {"account_name": account_name, "status": ""},
    })
}

fn chat(from: &str, to: &str, text: &str) -> Value {
    json!({
        "action": "msg",
        "time": 0.0,
        "from": from,
        "to": to,
        "message": text,
        "encoding": "utf-8",
    })
}

fn probe() -> Value {
    json!({"action": "probe", "time": 0.0})
}

// ---------------------------------------------------------------------------
// Scenario A: presence + duplicate login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_login_rejected_and_disconnected() {
    let server = TestServer::start(temp_dir()).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.send(&presence("alice")).await;
    let reply = alice.next_frame().await;
    assert_eq!(reply["response"], 200);
    assert_eq!(reply["alert"], "OK");

    // A second claim for "alice" before the first disconnects.
    let mut intruder = TestClient::connect(server.addr).await;
    intruder.send(&presence("alice")).await;
    let reply = intruder.next_frame().await;
    assert_eq!(reply["response"], 403);
    assert!(
        !reply["error"].as_str().unwrap_or_default().is_empty(),
        "403 must carry an error description"
    );
    intruder.expect_closed().await;

    // The established session is untouched.
    alice.send(&probe()).await;
    assert_eq!(alice.next_frame().await["response"], 200);
}

// ---------------------------------------------------------------------------
// Scenario B: offline enqueue, delivery on reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_message_delivered_when_recipient_appears() {
    let server = TestServer::start(temp_dir()).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.send(&presence("alice")).await;
    assert_eq!(alice.next_frame().await["response"], 200);

    // bob is not connected; the sender is still acknowledged.
    alice.send(&chat("alice", "bob", "hi")).await;
    assert_eq!(alice.next_frame().await["response"], 200);

    // bob arrives later and receives the queued message right after
    // the presence acknowledgement, before any new live traffic.
    let mut bob = TestClient::connect(server.addr).await;
    bob.send(&presence("bob")).await;
    assert_eq!(bob.next_frame().await["response"], 200);

    let delivered = bob.next_frame().await;
    assert_eq!(delivered["action"], "msg");
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["to"], "bob");
    assert_eq!(delivered["message"], "hi");
    assert_eq!(delivered["encoding"], "utf-8");
}

#[tokio::test]
async fn queued_messages_arrive_in_send_order() {
    let server = TestServer::start(temp_dir()).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.send(&presence("alice")).await;
    assert_eq!(alice.next_frame().await["response"], 200);

    for text in ["first", "second", "third"] {
        alice.send(&chat("alice", "bob", text)).await;
        assert_eq!(alice.next_frame().await["response"], 200);
    }

    let mut bob = TestClient::connect(server.addr).await;
    bob.send(&presence("bob")).await;
    assert_eq!(bob.next_frame().await["response"], 200);

    for expected in ["first", "second", "third"] {
        let delivered = bob.next_frame().await;
        assert_eq!(delivered["message"], expected);
    }
}

// ---------------------------------------------------------------------------
// Scenario C: protocol errors are survivable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_json_answered_500_and_connection_survives() {
    let server = TestServer::start(temp_dir()).await;

    let mut client = TestClient::connect(server.addr).await;
    client.send_raw(b"this is not json").await;

    let reply = client.next_frame().await;
    assert_eq!(reply["response"], 500);
    assert!(!reply["error"].as_str().unwrap_or_default().is_empty());

    // The connection stays open for a retry.
    client.send(&presence("carol")).await;
    assert_eq!(client.next_frame().await["response"], 200);
}

#[tokio::test]
async fn missing_fields_answered_500_with_description() {
    let server = TestServer::start(temp_dir()).await;

    let mut client = TestClient::connect(server.addr).await;
    client
        .send(&json!({"action": "msg", "time": 0.0, "from": "carol"}))
        .await;

    let reply = client.next_frame().await;
    assert_eq!(reply["response"], 500);
    let description = reply["error"].as_str().unwrap_or_default();
    assert!(description.contains("missing"), "got: {description}");
}

// ---------------------------------------------------------------------------
// Room actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn room_actions_always_rejected_with_400() {
    let server = TestServer::start(temp_dir()).await;

    let mut client = TestClient::connect(server.addr).await;
    client.send(&presence("carol")).await;
    assert_eq!(client.next_frame().await["response"], 200);

    for action in ["join", "leave"] {
        client
            .send(&json!({"action": action, "time": 0.0, "room": "#general"}))
            .await;
        let reply = client.next_frame().await;
        assert_eq!(reply["response"], 400);
        assert_eq!(reply["error"], "Bad Request");
    }

    // Rejection does not close the connection.
    client.send(&probe()).await;
    assert_eq!(client.next_frame().await["response"], 200);
}

// ---------------------------------------------------------------------------
// Quit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quit_acknowledged_then_name_freed() {
    let server = TestServer::start(temp_dir()).await;

    let mut dave = TestClient::connect(server.addr).await;
    dave.send(&presence("dave")).await;
    assert_eq!(dave.next_frame().await["response"], 200);

    dave.send(&json!({"action": "quit", "time": 0.0})).await;
    assert_eq!(dave.next_frame().await["response"], 200);
    dave.expect_closed().await;

    // The session was unbound, so the name is free again.
    let mut dave2 = TestClient::connect(server.addr).await;
    dave2.send(&presence("dave")).await;
    assert_eq!(dave2.next_frame().await["response"], 200);
}

// ---------------------------------------------------------------------------
// Persistence across restarts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_queue_survives_a_restart() {
    let server = TestServer::start(temp_dir()).await;
    let addr = server.addr;

    let mut alice = TestClient::connect(addr).await;
    alice.send(&presence("alice")).await;
    assert_eq!(alice.next_frame().await["response"], 200);
    alice.send(&chat("alice", "bob", "see you after the restart")).await;
    assert_eq!(alice.next_frame().await["response"], 200);

    // Clean shutdown persists the queue.
    let data_dir = server.stop().await;

    // A new instance over the same data directory reloads it.
    let server = TestServer::start(data_dir).await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.send(&presence("bob")).await;
    assert_eq!(bob.next_frame().await["response"], 200);

    let delivered = bob.next_frame().await;
    assert_eq!(delivered["action"], "msg");
    assert_eq!(delivered["message"], "see you after the restart");
}
