//! HTTP signaling contract tests against a local axum server

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use remotecast_webrtc::signaling::{HttpSignaling, SignalEnvelope, SignalPayload, SignalingTransport};
use remotecast_webrtc::{Role, Session};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Default)]
struct ServerState {
    published: Mutex<Vec<Value>>,
    poll_queries: Mutex<Vec<HashMap<String, String>>>,
    poll_response: Mutex<Value>,
    fail_polls: Mutex<bool>,
    released: Mutex<Vec<String>>,
    cleanups: Mutex<u32>,
}

type SharedState = Arc<ServerState>;

async fn publish(State(state): State<SharedState>, Json(body): Json<Value>) -> Json<Value> {
    state.published.lock().push(body);
    Json(json!({ "ok": true }))
}

async fn poll(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.poll_queries.lock().push(params);
    if *state.fail_polls.lock() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(state.poll_response.lock().clone()).into_response()
}

async fn release(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    if let Some(session_id) = params.get("sessionId") {
        state.released.lock().push(session_id.clone());
    }
    Json(json!({ "ok": true }))
}

async fn cleanup(State(state): State<SharedState>) -> Json<Value> {
    *state.cleanups.lock() += 1;
    Json(json!({ "ok": true, "removed": 0 }))
}

/// Spin up the signaling server on an ephemeral port
async fn spawn_server() -> (SharedState, SocketAddr) {
    let state: SharedState = Arc::new(ServerState {
        poll_response: Mutex::new(json!({ "messages": [] })),
        ..Default::default()
    });

    let app = Router::new()
        .route("/", post(publish).delete(release))
        .route("/poll", get(poll))
        .route("/cleanup", post(cleanup))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, addr)
}

fn session() -> Session {
    Session::new("sess-1", "ABC234", Role::Screen)
}

#[tokio::test]
async fn test_publish_posts_envelope() {
    let (state, addr) = spawn_server().await;
    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();

    let envelope = SignalEnvelope::new(
        &Session::new("sess-1", "ABC234", Role::Controller),
        SignalPayload::Offer {
            sdp: "v=0".to_string(),
        },
    );
    transport.publish(&envelope).await.unwrap();

    let published = state.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["type"], "webrtc-signal");
    assert_eq!(published[0]["sessionId"], "sess-1");
    assert_eq!(published[0]["pairingCode"], "ABC234");
    assert_eq!(published[0]["sender"], "controller");
    assert_eq!(published[0]["data"]["type"], "offer");
}

#[tokio::test]
async fn test_poll_sends_query_params_and_parses_messages() {
    let (state, addr) = spawn_server().await;
    *state.poll_response.lock() = json!({
        "messages": [
            { "data": { "type": "offer", "sdp": "v=0" }, "sender": "controller" },
            { "data": { "type": "candidate",
                        "candidate": { "candidate": "candidate:1",
                                       "sdpMid": "0",
                                       "sdpMLineIndex": 0 } } }
        ]
    });

    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();
    let messages = transport.poll(&session()).await.unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].data.kind(), "offer");
    assert_eq!(messages[0].sender.as_deref(), Some("controller"));
    assert_eq!(messages[1].data.kind(), "candidate");

    let queries = state.poll_queries.lock().clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].get("pairingCode").map(String::as_str), Some("ABC234"));
    assert_eq!(queries[0].get("role").map(String::as_str), Some("screen"));
    assert_eq!(queries[0].get("sessionId").map(String::as_str), Some("sess-1"));
}

#[tokio::test]
async fn test_poll_with_no_messages() {
    let (_state, addr) = spawn_server().await;
    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();

    let messages = transport.poll(&session()).await.unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_poll_non_success_status_is_an_error() {
    let (state, addr) = spawn_server().await;
    *state.fail_polls.lock() = true;

    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();
    let result = transport.poll(&session()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_release_deletes_by_session_id() {
    let (state, addr) = spawn_server().await;
    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();

    transport.release(&session()).await.unwrap();

    assert_eq!(state.released.lock().clone(), vec!["sess-1".to_string()]);
}

#[tokio::test]
async fn test_cleanup_hits_cleanup_endpoint() {
    let (state, addr) = spawn_server().await;
    let transport = HttpSignaling::for_url(&format!("http://{}", addr)).unwrap();

    transport.cleanup().await.unwrap();

    assert_eq!(*state.cleanups.lock(), 1);
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    // Nothing listens on this port
    let transport = HttpSignaling::for_url("http://127.0.0.1:9").unwrap();
    assert!(transport.poll(&session()).await.is_err());
}
