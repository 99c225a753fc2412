//! End-to-end tests against a live server on an ephemeral port.

use futures_util::{SinkExt, StreamExt};
use huddle_server::{AppState, Config};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config));
        tokio::spawn(huddle_server::serve(listener, Arc::clone(&state)));
        Self { addr, state }
    }

    fn url(&self) -> String {
        format!("ws://{}{}", self.addr, self.state.config.transport.websocket_path)
    }

    /// Connect and wait until the hub has registered the connection.
    async fn connect(&self) -> Client {
        let before = self.state.hub.stats().connections;
        let (client, _) = connect_async(self.url()).await.unwrap();
        self.wait_until(|s| s.hub.stats().connections > before).await;
        client
    }

    async fn wait_until(&self, cond: impl Fn(&AppState) -> bool) {
        timeout(WAIT, async {
            while !cond(&self.state) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

async fn send(client: &mut Client, event: Value) {
    client.send(Message::Text(event.to_string())).await.unwrap();
}

async fn init(server: &TestServer, client: &mut Client, user: &str) {
    send(client, json!({ "type": "init", "userId": user })).await;
    server.wait_until(|s| s.hub.is_online(user)).await;
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let msg = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = timeout(QUIET, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                _ => futures_util::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected event: {:?}", result);
}

#[tokio::test]
async fn test_identify_announces_online_to_others() {
    let server = TestServer::start(Config::default()).await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    init(&server, &mut alice, "alice").await;

    assert_eq!(
        next_event(&mut bob).await,
        json!({ "type": "presence", "userId": "alice", "online": true })
    );
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_relay_excludes_sender() {
    let server = TestServer::start(Config::default()).await;
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;
    let mut c3 = server.connect().await;

    let typing = json!({ "type": "typing", "conversationId": "c9", "userId": "u1", "isTyping": true });
    send(&mut c1, typing.clone()).await;

    assert_eq!(next_event(&mut c2).await, typing);
    assert_eq!(next_event(&mut c3).await, typing);
    assert_silent(&mut c1).await;
}

#[tokio::test]
async fn test_relay_keeps_payload_text() {
    let server = TestServer::start(Config::default()).await;
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    let raw = r#"{"type":"typing","conversationId":"c1","userId":"u1","isTyping":true}"#;
    c1.send(Message::Text(raw.to_string())).await.unwrap();

    let msg = timeout(WAIT, c2.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(msg, Message::Text(raw.to_string()));
}

#[tokio::test]
async fn test_relays_from_unidentified_connection() {
    let server = TestServer::start(Config::default()).await;
    let mut sender = server.connect().await;
    let mut watcher = server.connect().await;

    let message = json!({ "type": "message", "message": { "id": "m1", "content": "hi" } });
    send(&mut sender, message.clone()).await;

    assert_eq!(next_event(&mut watcher).await, message);
}

#[tokio::test]
async fn test_offline_only_after_last_tab_closes() {
    let server = TestServer::start(Config::default()).await;
    let mut tab1 = server.connect().await;
    let mut tab2 = server.connect().await;
    let mut watcher = server.connect().await;

    init(&server, &mut tab1, "u1").await;
    assert_eq!(next_event(&mut watcher).await["online"], json!(true));

    send(&mut tab2, json!({ "type": "init", "userId": "u1" })).await;
    server.wait_until(|s| s.hub.presence_count("u1") == 2).await;
    assert_silent(&mut watcher).await;

    tab1.close(None).await.unwrap();
    server.wait_until(|s| s.hub.presence_count("u1") == 1).await;
    assert_silent(&mut watcher).await;

    drop(tab2);
    assert_eq!(
        next_event(&mut watcher).await,
        json!({ "type": "presence", "userId": "u1", "online": false })
    );
    server.wait_until(|s| !s.hub.is_online("u1")).await;
    assert_silent(&mut watcher).await;
}

#[tokio::test]
async fn test_malformed_payload_keeps_connection_open() {
    let server = TestServer::start(Config::default()).await;
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    c1.send(Message::Text("not json".into())).await.unwrap();
    send(&mut c1, json!({ "type": "init" })).await;
    send(&mut c1, json!({ "type": "shout", "text": "hey" })).await;
    assert_silent(&mut c2).await;

    let typing = json!({ "type": "typing", "isTyping": false });
    send(&mut c1, typing.clone()).await;
    assert_eq!(next_event(&mut c2).await, typing);
    assert_eq!(server.state.hub.stats().connections, 2);
}

#[tokio::test]
async fn test_binary_frames_are_handled_like_text() {
    let server = TestServer::start(Config::default()).await;
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    let payload = json!({ "type": "delete", "messageId": "m7" });
    c1.send(Message::Binary(payload.to_string().into_bytes()))
        .await
        .unwrap();

    assert_eq!(next_event(&mut c2).await, payload);
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let mut config = Config::default();
    config.heartbeat.timeout_ms = 150;
    let server = TestServer::start(config).await;

    let mut idle = server.connect().await;
    init(&server, &mut idle, "sleepy").await;

    server.wait_until(|s| s.hub.stats().connections == 0).await;
    assert!(!server.state.hub.is_online("sleepy"));
}

#[tokio::test]
async fn test_connection_limit_rejects_upgrade() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let server = TestServer::start(config).await;

    let _first = server.connect().await;
    assert!(connect_async(server.url()).await.is_err());
    assert_eq!(server.state.hub.stats().connections, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upgrades_respect_connection_limit() {
    let mut config = Config::default();
    config.limits.max_connections = 2;
    let server = TestServer::start(config).await;
    let url = server.url();

    let attempts = (0..8).map(|_| connect_async(url.clone()));
    let results = futures_util::future::join_all(attempts).await;

    let accepted: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(accepted.len(), 2);
    server.wait_until(|s| s.hub.stats().connections == 2).await;
}
