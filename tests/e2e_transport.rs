//! End-to-end transport layer tests.
//!
//! These tests verify that both channels actually work against real
//! sockets: an axum GraphQL endpoint for the request channel and a
//! tungstenite server speaking graphql-ws for the event channel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{routing::post, Json, Router};
use chatplug::protocol::{Operation, OperationRequest};
use chatplug::transport::{EventChannel, HttpChannel, RequestChannel, WsChannel};
use chatplug::{ChatPlugError, ClientConfig, ReconnectConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TOKEN: &str = "secret-token";

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(
        format!("http://{addr}/query"),
        format!("ws://{addr}/query"),
        TOKEN,
        "inst-1",
    )
}

// ---------------------------------------------------------------------------
// Request channel
// ---------------------------------------------------------------------------

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn graphql(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push((auth.clone(), body.clone()));

    if auth.as_deref() != Some(TOKEN) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "errors": [{ "message": "invalid access token" }] })),
        );
    }

    match body["operationName"].as_str() {
        Some("setStatus") => (
            StatusCode::OK,
            Json(json!({ "data": { "setInstanceStatus": { "id": "inst-1" } } })),
        ),
        Some("setSearchResponse") => (
            StatusCode::OK,
            Json(json!({
                "data": null,
                "errors": [{ "message": "unknown query" }, { "message": "try later" }]
            })),
        ),
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "message": "no such operation" }))),
    }
}

async fn start_http() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let router = Router::new()
        .route("/query", post(graphql))
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, seen)
}

#[tokio::test]
async fn test_http_channel_sends_credential_and_operation() {
    let (addr, seen) = start_http().await;
    let channel = HttpChannel::new(&config_for(addr)).unwrap();
    let request = OperationRequest::new(Operation::SetInstanceStatus);

    let data = timeout(Duration::from_secs(5), channel.execute(&request))
        .await
        .expect("request timed out")
        .unwrap();
    assert_eq!(data["setInstanceStatus"]["id"], "inst-1");

    let seen = seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some(TOKEN));
    assert_eq!(body["operationName"], "setStatus");
    assert!(body["query"].as_str().unwrap().contains("INITIALIZED"));
}

#[tokio::test]
async fn test_http_channel_maps_graphql_errors() {
    let (addr, _seen) = start_http().await;
    let channel = HttpChannel::new(&config_for(addr)).unwrap();
    let request = OperationRequest::with_variables(
        Operation::SetSearchResponse,
        &json!({ "forQuery": "q", "threads": [] }),
    )
    .unwrap();

    let err = channel.execute(&request).await.unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("unknown query; try later"));
}

#[tokio::test]
async fn test_http_channel_reports_rejected_credential() {
    let (addr, _seen) = start_http().await;
    let mut config = config_for(addr);
    config.access_token = "stale".into();
    let channel = HttpChannel::new(&config).unwrap();

    let err = channel
        .execute(&OperationRequest::new(Operation::SetInstanceStatus))
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(err.is_transport());
    assert!(text.contains("401"), "{text}");
    assert!(text.contains("invalid access token"), "{text}");
}

#[tokio::test]
async fn test_http_channel_unreachable_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = HttpChannel::new(&config_for(addr)).unwrap();
    let err = channel
        .execute(&OperationRequest::new(Operation::SetInstanceStatus))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

type ServerSocket = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    let echo_protocol = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "graphql-ws"
        );
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("graphql-ws"));
        Ok(response)
    };
    tokio_tungstenite::accept_hdr_async(stream, echo_protocol)
        .await
        .unwrap()
}

async fn next_frame(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await.expect("socket ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send_frame(socket: &mut ServerSocket, frame: Value) {
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

/// Accept a connection, check `connection_init` and acknowledge it
async fn handshake(listener: &TcpListener) -> ServerSocket {
    let mut socket = accept(listener).await;
    let init = next_frame(&mut socket).await;
    assert_eq!(init["type"], "connection_init");
    assert_eq!(init["payload"]["accessToken"], TOKEN);
    send_frame(&mut socket, json!({ "type": "ka" })).await;
    send_frame(&mut socket, json!({ "type": "connection_ack" })).await;
    socket
}

fn pushed_message(body: &str) -> Value {
    json!({
        "messageReceived": {
            "targetThreadId": "T",
            "message": {
                "id": "m-1",
                "originId": "ext-1",
                "author": { "id": "a", "originId": "u", "username": "alice", "avatarUrl": "" },
                "thread": {
                    "id": "t", "name": "general", "originId": "chan",
                    "threadGroupId": "g", "serviceInstanceId": "inst-1"
                },
                "body": body,
                "threadGroupId": "g",
                "attachments": []
            }
        }
    })
}

#[tokio::test]
async fn test_ws_handshake_and_routing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = handshake(&listener).await;

        let start = next_frame(&mut socket).await;
        assert_eq!(start["type"], "start");
        assert_eq!(start["payload"]["operationName"], "onNewMessage");
        let id = start["id"].clone();

        send_frame(&mut socket, json!({ "type": "data", "id": "999", "payload": { "data": {} } })).await;
        send_frame(
            &mut socket,
            json!({ "type": "data", "id": id, "payload": { "data": pushed_message("hi") } }),
        )
        .await;
        send_frame(&mut socket, json!({ "type": "complete", "id": id })).await;

        next_frame(&mut socket).await
    });

    let channel = WsChannel::new(&config_for(addr));
    let mut subscription = channel
        .subscribe(OperationRequest::new(Operation::MessageReceived))
        .await
        .unwrap();

    let data = timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("no data")
        .unwrap()
        .unwrap();
    assert_eq!(data["messageReceived"]["message"]["body"], "hi");

    // complete ends the stream
    let end = timeout(Duration::from_secs(5), subscription.next()).await.unwrap();
    assert!(end.is_none());

    drop(subscription);
    drop(channel);
    let last = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(last["type"], "connection_terminate");
}

#[tokio::test]
async fn test_ws_drop_sends_stop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut socket = handshake(&listener).await;
        let start = next_frame(&mut socket).await;
        let stop = next_frame(&mut socket).await;
        (start, stop)
    });

    let channel = WsChannel::new(&config_for(addr));
    let subscription = channel
        .subscribe(OperationRequest::new(Operation::SubscribeToSearchRequests))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(subscription);

    let (start, stop) = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(stop["type"], "stop");
    assert_eq!(stop["id"], start["id"]);
}

#[tokio::test]
async fn test_ws_error_frame_fails_subscription() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut socket = handshake(&listener).await;
        let start = next_frame(&mut socket).await;
        send_frame(
            &mut socket,
            json!({ "type": "error", "id": start["id"], "payload": { "message": "unknown field" } }),
        )
        .await;
        // hold the socket open
        let _ = socket.next().await;
    });

    let channel = WsChannel::new(&config_for(addr));
    let mut subscription = channel
        .subscribe(OperationRequest::new(Operation::ConfigurationReceived))
        .await
        .unwrap();

    let item = timeout(Duration::from_secs(5), subscription.next()).await.unwrap();
    assert!(matches!(item, Some(Err(ChatPlugError::Transport(_)))));
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_ws_reconnect_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut first = handshake(&listener).await;
        let original = next_frame(&mut first).await;
        drop(first);

        let mut second = handshake(&listener).await;
        let resent = next_frame(&mut second).await;
        send_frame(
            &mut second,
            json!({ "type": "data", "id": resent["id"], "payload": { "data": pushed_message("again") } }),
        )
        .await;
        let _ = second.next().await;
        (original, resent)
    });

    let mut config = config_for(addr);
    config.transport.reconnect = ReconnectConfig {
        base_ms: 10,
        max_ms: 50,
        ..ReconnectConfig::default()
    };
    let channel = WsChannel::new(&config);
    let mut subscription = channel
        .subscribe(OperationRequest::new(Operation::MessageReceived))
        .await
        .unwrap();

    let data = timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("no data after reconnect")
        .unwrap()
        .unwrap();
    assert_eq!(data["messageReceived"]["message"]["body"], "again");

    drop(subscription);
    drop(channel);
    let (original, resent) = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(original["id"], resent["id"]);
    assert_eq!(original["payload"], resent["payload"]);
}

#[tokio::test]
async fn test_ws_disconnect_without_reconnect_closes_streams() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut socket = handshake(&listener).await;
        let _start = next_frame(&mut socket).await;
        let _ = socket.close(None).await;
    });

    let mut config = config_for(addr);
    config.transport.reconnect = ReconnectConfig::disabled();
    let channel = WsChannel::new(&config);
    let mut subscription = channel
        .subscribe(OperationRequest::new(Operation::MessageReceived))
        .await
        .unwrap();

    let item = timeout(Duration::from_secs(5), subscription.next()).await.unwrap();
    assert!(matches!(item, Some(Err(ChatPlugError::StreamClosed(_)))));
    assert!(subscription.next().await.is_none());
}
