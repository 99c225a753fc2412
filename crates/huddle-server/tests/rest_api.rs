//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use huddle_server::{app, AppState, Config};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn router() -> Router {
    app(Arc::new(AppState::new(Config::default())))
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

fn post(user: &str, body: Value) -> Request<Body> {
    Request::post("/api/messages")
        .header("x-user-id", user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(id: &str, user: &str) -> Request<Body> {
    Request::delete(format!("/api/messages/{id}"))
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_websocket_path_requires_upgrade() {
    let router = router();
    let request = Request::get("/api/messages/ws").body(Body::empty()).unwrap();
    let (status, body) = call(&router, request).await;

    assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
    assert_eq!(body, json!("Expected websocket"));
}

#[tokio::test]
async fn test_websocket_path_rejects_other_methods() {
    let router = router();
    for method in ["POST", "PUT", "DELETE"] {
        let request = Request::builder()
            .method(method)
            .uri("/api/messages/ws")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&router, request).await;
        assert_eq!(status, StatusCode::UPGRADE_REQUIRED, "{method}");
    }
}

#[tokio::test]
async fn test_health_reports_hub_stats() {
    let router = router();
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["online_users"], 0);
}

#[tokio::test]
async fn test_requests_without_user_are_unauthorized() {
    let router = router();
    let request = Request::get("/api/messages").body(Body::empty()).unwrap();
    let (status, _) = call(&router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_and_list_messages() {
    let router = router();

    let (status, body) = call(
        &router,
        post("alice", json!({ "recipientId": "bob", "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let conversation_id = body["conversationId"].as_str().unwrap().to_owned();
    assert_eq!(body["data"]["sender"], "alice");

    let (status, _) = call(
        &router,
        post(
            "bob",
            json!({ "conversationId": &conversation_id, "recipientId": "alice", "content": "hey" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &router,
        get(&format!("/api/messages?conversationId={conversation_id}"), "alice"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["hello", "hey"]);

    let (_, body) = call(&router, get("/api/messages?with=alice", "bob")).await;
    assert_eq!(body["conversation"]["id"], json!(conversation_id));
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);

    let (_, body) = call(&router, get("/api/messages", "bob")).await;
    assert_eq!(body["conversations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_outsider_cannot_read_conversation() {
    let router = router();
    let (_, body) = call(
        &router,
        post("alice", json!({ "recipientId": "bob", "content": "private" })),
    )
    .await;
    let conversation_id = body["conversationId"].as_str().unwrap().to_owned();

    let (status, _) = call(
        &router,
        get(&format!("/api/messages?conversationId={conversation_id}"), "mallory"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_send_message_validation() {
    let router = router();

    let (status, _) = call(&router, post("alice", json!({ "content": "no recipient" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        post("alice", json!({ "recipientId": "bob", "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_long = "x".repeat(2001);
    let (status, _) = call(
        &router,
        post("alice", json!({ "recipientId": "bob", "content": too_long })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        post("alice", json!({ "recipientId": "alice", "content": "me" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        post(
            "alice",
            json!({ "conversationId": "missing", "recipientId": "bob", "content": "hi" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_sender_can_delete() {
    let router = router();
    let (_, body) = call(
        &router,
        post("alice", json!({ "recipientId": "bob", "content": "oops" })),
    )
    .await;
    let message_id = body["data"]["id"].as_str().unwrap().to_owned();

    let (status, _) = call(&router, delete(&message_id, "bob")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&router, delete(&message_id, "alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Message deleted successfully");

    let (status, _) = call(&router, delete(&message_id, "alice")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
