use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use dealbot::{
    agent::MockAgent,
    auth::{SessionClaims, SessionVerifier},
    http::{AppState, router},
    orchestrator::ChatOrchestrator,
    pipeline::{HistoryWindow, RetryController},
    store::InMemoryStore,
    tools::{ToolRegistry, ToolSettings},
    types::Deal,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

async fn app() -> Router {
    let store = Arc::new(InMemoryStore::default());
    for (id, title, price) in [("d-cheap", "Earbuds", 900.0), ("d-pricey", "Laptop", 45_000.0)] {
        store
            .insert_deal(
                Deal {
                    id: id.to_owned(),
                    title: title.to_owned(),
                    description: format!("{title} on sale"),
                    price,
                    image_url: None,
                },
                None,
            )
            .await;
    }

    let tools = Arc::new(ToolRegistry::new(
        store.clone(),
        None,
        ToolSettings {
            vector_search_timeout: Duration::from_secs(1),
            payment_url_base: "https://shop.example.test/payment".to_owned(),
        },
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::new(MockAgent::new(tools)),
        store,
        RetryController::new(3, None),
        HistoryWindow::default(),
    ));

    router(AppState {
        orchestrator,
        sessions: SessionVerifier::new(SECRET),
    })
}

fn token_for(user_id: &str) -> String {
    SessionVerifier::new(SECRET)
        .issue(&SessionClaims {
            user_id: user_id.to_owned(),
            session_id: format!("session-{user_id}"),
            phone: "+910000000000".to_owned(),
            exp: Some(chrono::Utc::now().timestamp() + 3600),
        })
        .expect("token should be issued")
}

fn request(method: Method, uri: &str, user_id: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header(
            header::COOKIE,
            format!("chatbot_session={}", token_for(user_id)),
        );
    }
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request should build")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should be served");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/chat", None, Some(json!({ "message": "hi" }))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized. Please login first.");

    let mut forged = request(Method::GET, "/api/chat", None, None);
    forged.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer not.a.token".parse().expect("header should parse"),
    );
    let (status, _) = send(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_message_is_a_bad_request() {
    let app = app().await;
    let (status, body) = send(
        &app,
        request(Method::POST, "/api/chat", Some("u1"), Some(json!({ "chatId": "c1" }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message is required.");
}

#[tokio::test]
async fn deal_turn_round_trips_through_chat_history() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/chat",
            Some("u1"),
            Some(json!({ "message": "Show me deals under 1000" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"]["role"], "bot");
    assert_eq!(body["message"]["type"], "deals");
    let deals = body["message"]["metadata"]["deals"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0]["id"], "d-cheap");
    assert_eq!(deals[0]["price"], 900.0);

    let chat_id = body["chatId"].as_str().unwrap_or_default().to_owned();
    assert!(!chat_id.is_empty());

    let (_, listing) = send(&app, request(Method::GET, "/api/chat", Some("u1"), None)).await;
    assert_eq!(listing["chats"][0]["id"], chat_id.as_str());
    assert_eq!(listing["chats"][0]["title"], "Show me deals under 1000");
    assert_eq!(listing["chats"][0]["messageCount"], 2);

    let uri = format!("/api/chat?chatId={chat_id}");
    let (_, history) = send(&app, request(Method::GET, &uri, Some("u1"), None)).await;
    let messages = history["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["type"], "deals");

    // Another shopper sees nothing and cannot delete it.
    let (_, foreign) = send(&app, request(Method::GET, &uri, Some("u2"), None)).await;
    assert_eq!(foreign["messages"], json!([]));
    let (status, _) = send(&app, request(Method::DELETE, &uri, Some("u2"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, deleted) = send(&app, request(Method::DELETE, &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted, json!({ "success": true, "deletedId": chat_id }));

    let (status, body) = send(&app, request(Method::DELETE, &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Chat not found or unauthorized");

    let (status, body) =
        send(&app, request(Method::DELETE, "/api/chat", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Chat ID is required");
}

#[tokio::test]
async fn stream_emits_items_before_done() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/chat/stream",
            Some("u1"),
            Some(json!({ "message": "find deals" })),
        ))
        .await
        .expect("request should be served");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"))
    );

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let events = String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .collect::<Vec<_>>();

    let kinds = events
        .iter()
        .map(|event| event["type"].as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(kinds.first().map(String::as_str), Some("thinking"));
    assert_eq!(kinds.last().map(String::as_str), Some("done"));
    assert!(!kinds.iter().any(|kind| kind == "error"));

    let items = events
        .iter()
        .filter(|event| event["type"] == "item")
        .collect::<Vec<_>>();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["index"], 0);
    assert_eq!(items[1]["index"], 1);

    let done = events.last().cloned().unwrap_or_default();
    assert_eq!(done["message"]["type"], "deals");
    assert_eq!(done["thinking"][1]["action"], "tool_call");
    assert_eq!(done["thinking"][1]["tool"], "get_deals");
}

#[tokio::test]
async fn stream_requires_a_session() {
    let app = app().await;
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/chat/stream",
            None,
            Some(json!({ "message": "find deals" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
