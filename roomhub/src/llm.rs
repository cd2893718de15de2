//! OpenAI-compatible chat-completions client.
//!
//! The assistant pipeline only depends on `LanguageModel`; this is the
//! production implementation wired up by `main`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::collaborators::{GenerationRequest, LanguageModel, ModelError, TurnRole};
use crate::config::LlmConfig;

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleModel {
    /// Returns `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, ModelError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ModelError::Http(e.to_string()))?;
        Ok(Some(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        }))
    }
}

/// Flatten a generation request into chat-completions messages.
fn to_wire_messages(request: &GenerationRequest) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);

    let mut system = request.system.clone();
    if !request.context.is_empty() {
        system.push_str("\n\nContext:\n");
        for item in &request.context {
            system.push_str("- ");
            system.push_str(item);
            system.push('\n');
        }
    }
    if !system.trim().is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: system,
        });
    }

    for turn in &request.history {
        let (role, content) = match turn.role {
            TurnRole::User => ("user", format!("{}: {}", turn.author, turn.content)),
            TurnRole::Assistant => ("assistant", turn.content.clone()),
        };
        messages.push(WireMessage { role, content });
    }

    messages.push(WireMessage {
        role: "user",
        content: request.question.clone(),
    });
    messages
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
        let body = CompletionRequest {
            model: self.model.clone(),
            messages: to_wire_messages(request),
            temperature: 0.4,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Http(format!(
                "{status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}
