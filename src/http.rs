use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{
    auth::{SessionVerifier, session_token},
    error::ApiError,
    orchestrator::{ChatOrchestrator, ChatTurnRequest},
    pipeline::StreamEvent,
    types::TurnReply,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub sessions: SessionVerifier,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    success: bool,
    #[serde(flatten)]
    reply: TurnReply,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/chat",
            post(send_message).get(chat_history).delete(delete_chat),
        )
        .route("/api/chat/stream", post(stream_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let request = parse_turn_request(&body)?;

    let reply = state.orchestrator.handle_turn(&user_id, request).await?;
    Ok(Json(TurnResponse {
        success: true,
        reply,
    }))
}

async fn stream_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let request = parse_turn_request(&body)?;

    let events = state.orchestrator.stream_turn(user_id, request);
    Ok(Sse::new(sse_events(events))
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticate(&state, &headers)?;

    match query.chat_id.filter(|id| !id.is_empty()) {
        Some(chat_id) => {
            let messages = state.orchestrator.chat_messages(&user_id, &chat_id).await?;
            Ok(Json(json!({ "messages": messages })))
        }
        None => {
            let chats = state.orchestrator.list_chats(&user_id).await?;
            Ok(Json(json!({ "chats": chats })))
        }
    }
}

async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticate(&state, &headers)?;
    let chat_id = query
        .chat_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Chat ID is required".to_owned()))?;

    if !state.orchestrator.delete_chat(&user_id, &chat_id).await? {
        return Err(ApiError::NotFound(
            "Chat not found or unauthorized".to_owned(),
        ));
    }
    Ok(Json(json!({ "success": true, "deletedId": chat_id })))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = session_token(headers).ok_or(ApiError::Unauthorized)?;
    state
        .sessions
        .verify(&token)
        .map(|claims| claims.user_id)
        .map_err(|error| {
            debug!(?error, "session rejected");
            ApiError::Unauthorized
        })
}

/// A body is accepted when it is a JSON object whose `message` is a
/// non-empty string; `chatId` is optional.
fn parse_turn_request(body: &[u8]) -> Result<ChatTurnRequest, ApiError> {
    let missing = || ApiError::BadRequest("Message is required.".to_owned());
    let body: Value = serde_json::from_slice(body).map_err(|_| missing())?;

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(missing)?;
    let chat_id = body
        .get("chatId")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(ChatTurnRequest {
        message: message.to_owned(),
        chat_id,
    })
}

fn sse_events(
    events: impl Stream<Item = StreamEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events.filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(error) => {
                warn!(?error, "failed to encode stream event");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::parse_turn_request;

    #[test]
    fn message_must_be_a_non_empty_string() {
        assert!(parse_turn_request(br#"{"message":"hi"}"#).is_ok());
        assert!(parse_turn_request(br#"{"message":""}"#).is_err());
        assert!(parse_turn_request(br#"{"message":"   "}"#).is_err());
        assert!(parse_turn_request(br#"{"message":42}"#).is_err());
        assert!(parse_turn_request(br#"{}"#).is_err());
        assert!(parse_turn_request(b"not json").is_err());
    }

    #[test]
    fn chat_id_is_optional() {
        let request = parse_turn_request(br#"{"message":"hi","chatId":"c1"}"#)
            .expect("request should parse");
        assert_eq!(request.chat_id.as_deref(), Some("c1"));
        assert_eq!(request.message, "hi");
    }
}
