//! HTTP room endpoints
//!
//! - `GET /room?id=...` returns room info, creating the room if needed
//! - `GET /room` returns the topic directory
//! - `POST /room` runs the single-shot assistant (form or JSON body)

use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use shared_types::{RoomInfo, RoomMessage, TopicDirectory};
use std::collections::HashMap;

use crate::api::{validate_content, ApiError, ApiState};
use crate::registry::RegistryError;

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub id: Option<String>,
}

/// Body of `POST /room`.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub response: String,
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DirectMessageResponse {
    pub status: String,
    pub room: String,
}

/// Accepts `application/json` or a urlencoded form.
pub struct AskBody(pub AskRequest);

impl<S> FromRequest<S> for AskBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            Json::<AskRequest>::from_request(req, state)
                .await
                .map(|Json(body)| AskBody(body))
                .map_err(|e| ApiError::InvalidInput(e.body_text()))
        } else {
            Form::<AskRequest>::from_request(req, state)
                .await
                .map(|Form(body)| AskBody(body))
                .map_err(|e| ApiError::InvalidInput(e.body_text()))
        }
    }
}

/// Room info for `id`, or the topic directory when no id is given.
pub async fn get_room(
    State(state): State<ApiState>,
    Query(query): Query<RoomQuery>,
) -> Result<Response, ApiError> {
    let app_state = &state.app_state;

    let Some(raw_id) = query.id.filter(|id| !id.trim().is_empty()) else {
        let directory = TopicDirectory {
            topics: app_state.config().topics.clone(),
            summaries: app_state.registry().topic_summaries().await,
        };
        return Ok(Json(directory).into_response());
    };

    let timeout = app_state.config().timings.info_timeout;
    let room = match tokio::time::timeout(timeout, app_state.registry().get_or_create(&raw_id)).await
    {
        Ok(Ok(room)) => room,
        Ok(Err(RegistryError::InvalidId(e))) => return Err(ApiError::InvalidInput(e.to_string())),
        Ok(Err(e)) => return Err(ApiError::Internal(e.to_string())),
        Err(_) => {
            tracing::warn!(room_id = %raw_id, "Room info timed out");
            return Err(ApiError::Timeout(format!(
                "room {raw_id} not ready within {}ms",
                timeout.as_millis()
            )));
        }
    };

    let context = room.context();
    Ok(Json(RoomInfo {
        id: room.id().to_string(),
        title: context.title,
        summary: context.summary,
        url: context.source_url,
        is_room: true,
    })
    .into_response())
}

/// Single-shot assistant answer, or a direct message when the prompt starts with `@`.
pub async fn post_room(
    State(state): State<ApiState>,
    headers: HeaderMap,
    AskBody(body): AskBody,
) -> Result<Response, ApiError> {
    let app_state = &state.app_state;

    let user_id = app_state
        .authenticator()
        .authenticate(&headers, &HashMap::new())
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    let prompt = validate_content(&body.prompt)?;
    let topic = body
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .or_else(|| app_state.config().topics.first().cloned())
        .unwrap_or_else(|| "General".to_string());

    let assistant = app_state.assistant();
    if prompt.starts_with('@') && !assistant.mentions_assistant(first_word(prompt)) {
        let room_id = format!("topic_{topic}");
        let room = app_state
            .registry()
            .get_or_create(&room_id)
            .await
            .map_err(|e| match e {
                RegistryError::InvalidId(e) => ApiError::InvalidInput(e.to_string()),
                other => ApiError::Internal(other.to_string()),
            })?;
        room.broadcast(RoomMessage::user(&user_id, prompt))
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tracing::info!(room_id = %room_id, user_id = %user_id, "Direct message delivered");
        return Ok(Json(DirectMessageResponse {
            status: "sent".to_string(),
            room: room_id,
        })
        .into_response());
    }

    app_state
        .quota()
        .check(&user_id)
        .await
        .map_err(ApiError::Paywall)?;

    match assistant
        .answer_single_shot(prompt, body.context.as_deref(), &topic)
        .await
    {
        Ok(response) => Ok(Json(AskResponse { response, topic }).into_response()),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Single-shot answer failed");
            Err(ApiError::Internal("assistant unavailable".to_string()))
        }
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_word() {
        assert_eq!(first_word("@micro hello"), "@micro");
        assert_eq!(first_word(""), "");
    }

    #[test]
    fn test_ask_request_defaults() {
        let body: AskRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(body.prompt, "hi");
        assert!(body.context.is_none());
        assert!(body.topic.is_none());
    }
}
