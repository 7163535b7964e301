// Copyright 2020 Joyent, Inc.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use slog::{o, Drain, Level, LevelFilter, Logger};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use api_transport::{ApiClient, Credentials, MemoryTokenStore, TokenStore, TransportConfig};

pub type ServerSocket = WebSocketStream<TcpStream>;

pub fn test_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Info,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

/// An address nothing is listening on.
pub fn dead_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

/// Accept WebSocket connections forever, handing each one to `handler`
/// along with its zero-based connection index.
pub async fn ws_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => {
                    tokio::spawn(handler(index, ws));
                    index += 1;
                }
                Err(e) => eprintln!("websocket handshake failed: {}", e),
            }
        }
    });

    addr
}

/// Serve `router` over HTTP on a fresh local port.
pub async fn http_server(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Build the answer a well-behaved server sends for `request`.
pub fn answer(request: &Value, error: Option<&str>, data: Value) -> Message {
    Message::Text(
        json!({
            "route": request["route"],
            "error": error,
            "data": data,
            "requestId": request["requestId"],
        })
        .to_string(),
    )
}

/// Next text frame from the client, parsed as JSON.
pub async fn next_request(ws: &mut ServerSocket) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Echo each request's route and data back, waiting `data.delay_ms` first
/// if present. Requests are answered concurrently, so answers can overtake
/// one another. Every received frame is also forwarded to `seen`.
pub async fn echo_connection(ws: ServerSocket, seen: Option<mpsc::UnboundedSender<Value>>) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let request: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if let Some(seen) = &seen {
            let _ = seen.send(request.clone());
        }

        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Some(ms) = request["data"]["delay_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            let data = request["data"].clone();
            let _ = out.send(answer(&request, None, data));
        });
    }

    drop(out_tx);
    let _ = writer.await;
}

pub fn config_for(socket: SocketAddr, http: SocketAddr) -> TransportConfig {
    TransportConfig::new(
        format!("ws://{}/ws", socket),
        format!("http://{}/api", http),
    )
    .with_reconnect_delay(Duration::from_millis(50))
    .with_connect_timeout(Duration::from_secs(2))
}

pub fn logged_in(token: &str) -> Arc<dyn TokenStore> {
    Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
        token,
        json!({"id": 1, "username": "admin"}),
    )))
}

pub fn logged_out() -> Arc<dyn TokenStore> {
    Arc::new(MemoryTokenStore::new())
}

/// Start a client against `config` and wait for its socket to open.
pub async fn open_client(config: TransportConfig, tokens: Arc<dyn TokenStore>) -> ApiClient {
    let log = test_logger();
    let client = ApiClient::start(config, tokens, Some(&log)).unwrap();
    assert!(
        client.wait_until_open(Duration::from_secs(5)).await,
        "socket never opened"
    );
    client
}
