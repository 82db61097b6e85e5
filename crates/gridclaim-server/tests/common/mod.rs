use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gridclaim_core::net::messages::{ClientMessage, ServerMessage};
use gridclaim_core::net::protocol::{decode_server_message, encode_client_message};

use gridclaim_server::build_app;
use gridclaim_server::config::{ServerConfig, TimersConfig};
use gridclaim_server::state::AppState;

pub const TEST_ORIGIN: &str = "http://test.local";
pub const TEST_SUBPROTOCOL: &str = "echo-protocol";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

/// Config with fast timers and a test origin allow-listed.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        allowed_origins: vec![TEST_ORIGIN.to_string()],
        timers: TimersConfig {
            heartbeat_interval_ms: 50,
            countdown_tick_ms: 50,
            countdown_secs: 10,
        },
        ..ServerConfig::default()
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Create a game over HTTP and return its id.
    pub async fn create_game(&self, game_name: &str, player_name: &str) -> String {
        let resp = reqwest::Client::new()
            .post(format!("{}/api/v1/games", self.base_url()))
            .json(&serde_json::json!({ "gameName": game_name, "playerName": player_name }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = resp.json().await.unwrap();
        body["gameId"].as_str().unwrap().to_string()
    }

    /// Add a player to a game over HTTP.
    pub async fn join_game(&self, game_id: &str, player_name: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/api/v1/games/{game_id}/players", self.base_url()))
            .json(&serde_json::json!({ "playerName": player_name }))
            .send()
            .await
            .unwrap()
    }
}

/// Open a WebSocket with the given `Origin` and subprotocol headers.
pub async fn ws_connect_with(
    url: &str,
    origin: Option<&str>,
    subprotocol: Option<&str>,
) -> Result<WsStream, tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_str(origin).unwrap());
    }
    if let Some(protocol) = subprotocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(protocol).unwrap());
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Connect the way a browser on the allowed origin would.
pub async fn ws_connect(url: &str) -> WsStream {
    ws_connect_with(url, Some(TEST_ORIGIN), Some(TEST_SUBPROTOCOL))
        .await
        .unwrap()
}

/// HTTP status of a rejected upgrade.
pub fn rejected_status(err: &tungstenite::Error) -> u16 {
    match err {
        tungstenite::Error::Http(resp) => resp.status().as_u16(),
        other => panic!("Expected HTTP rejection, got: {other:?}"),
    }
}

pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded)).await.unwrap();
}

pub async fn ws_send_join(stream: &mut WsStream, game_id: &str, player: &str) {
    let msg = ClientMessage::Join {
        player: player.to_string(),
        game_id: game_id.to_string(),
    };
    ws_send_client_msg(stream, &msg).await;
}

pub async fn ws_send_start(stream: &mut WsStream, game_id: &str, player: &str) {
    let msg = ClientMessage::StartGame {
        player: player.to_string(),
        game_id: game_id.to_string(),
    };
    ws_send_client_msg(stream, &msg).await;
}

pub async fn ws_send_play(stream: &mut WsStream, game_id: &str, player: &str, x: i32, y: i32) {
    let msg = ClientMessage::PlayPosition {
        player: player.to_string(),
        game_id: game_id.to_string(),
        x,
        y,
    };
    ws_send_client_msg(stream, &msg).await;
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read raw binary data, returning None on timeout.
pub async fn ws_try_read_raw(stream: &mut WsStream, timeout_ms: u64) -> Option<Vec<u8>> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read until a message matches, skipping timer and heartbeat traffic in between.
pub async fn ws_expect(
    stream: &mut WsStream,
    matches: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = ws_read_server_msg(stream).await;
        if matches(&msg) {
            return msg;
        }
    }
}

/// Send `join` and wait for the resulting `joinGame` snapshot.
pub async fn ws_join(stream: &mut WsStream, game_id: &str, player: &str) -> ServerMessage {
    ws_send_join(stream, game_id, player).await;
    ws_expect(stream, |m| {
        matches!(m, ServerMessage::JoinGame { game } if game.id == game_id)
    })
    .await
}

/// Assert that nothing arrives on the stream for `ms` milliseconds.
pub async fn ws_assert_quiet(stream: &mut WsStream, ms: u64) {
    if let Some(data) = ws_try_read_raw(stream, ms).await {
        panic!("unexpected message: {:?}", decode_server_message(&data));
    }
}
