//! REST endpoints for conversations and messages.
//!
//! Callers identify themselves with the `x-user-id` header; authentication
//! happens upstream.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use huddle_core::{NewMessage, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Header carrying the authenticated caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// REST errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No caller identity on the request.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request body is missing required fields.
    #[error("{0}")]
    BadRequest(String),

    /// Storage rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) | ApiError::Store(StoreError::Invalid(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Store(StoreError::NotFound(..)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            metrics::record_error("store");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

/// The caller's user id, taken from [`USER_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_owned()))
            .ok_or(ApiError::Unauthorized)
    }
}

/// Query for `GET /api/messages`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadQuery {
    /// Messages of this conversation.
    pub conversation_id: Option<String>,
    /// The conversation with this user, created if needed.
    pub with: Option<String>,
}

/// Body of `POST /api/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// `GET /api/messages`
///
/// - `?conversationId=` lists that conversation's messages
/// - `?with=` finds or creates the conversation with that user and lists it
/// - no query lists the caller's conversations, most recent first
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(conversation_id) = query.conversation_id {
        let conversation = state.store.conversation(&conversation_id).await?;
        if !conversation.includes(&user) {
            return Err(StoreError::Forbidden(format!("{} is not a participant", user)).into());
        }
        let messages = state.store.messages_in(&conversation.id).await?;
        return Ok(Json(json!({ "messages": messages })));
    }

    match query.with {
        Some(other) => {
            let conversation = state.store.find_or_create_conversation(&user, &other).await?;
            let messages = state.store.messages_in(&conversation.id).await?;
            Ok(Json(json!({
                "conversation": conversation,
                "messages": messages,
            })))
        }
        None => {
            let conversations = state.store.conversations_for(&user).await?;
            Ok(Json(json!({ "conversations": conversations })))
        }
    }
}

/// `POST /api/messages`
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Json(body): Json<SendMessage>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(recipient), Some(content)) = (body.recipient_id, body.content) else {
        return Err(ApiError::BadRequest(
            "recipientId and content are required".into(),
        ));
    };

    let message = state
        .store
        .create_message(NewMessage {
            conversation_id: body.conversation_id,
            sender: user,
            recipient,
            content,
        })
        .await?;

    debug!(message = %message.id, conversation = %message.conversation_id, "Message stored");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Message sent",
            "conversationId": message.conversation_id,
            "data": message,
        })),
    ))
}

/// `DELETE /api/messages/:message_id`
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let message = state.store.delete_message(&message_id, &user).await?;
    debug!(message = %message.id, "Message deleted");
    Ok(Json(json!({ "message": "Message deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StoreError::NotFound("Message", "m1".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::Forbidden("no".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(StoreError::Invalid("empty".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StoreError::Backend("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
