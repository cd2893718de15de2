//! HTTP and websocket routes for RoomHub

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub mod room;
pub mod websocket;

use crate::app_state::AppState;
use crate::collaborators::Paywall;

/// Longest message or prompt accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: Arc<AppState>,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/room", get(websocket::room_websocket))
        .route("/room", get(room::get_room).post(room::post_room))
}

/// Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let rooms = state.app_state.registry().room_count().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "roomhub",
            "rooms": rooms,
        })),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("payment required: {}", .0.message)]
    Paywall(Paywall),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": message }))
            }
            ApiError::Paywall(paywall) => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "paywall",
                    "message": paywall.message,
                    "upgrade_url": paywall.upgrade_url,
                }),
            ),
            ApiError::Timeout(message) => {
                (StatusCode::REQUEST_TIMEOUT, json!({ "error": message }))
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Trim and bound-check a chat message or prompt.
pub fn validate_content(raw: &str) -> Result<&str, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::InvalidInput("message is empty".to_string()));
    }
    let chars = content.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "message is {chars} characters; the limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(content)
}
