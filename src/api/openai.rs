//! OpenAI chat completions backend.
//!
//! Turn-based: messages map one to one, system turns included. The stream
//! ends on the `[DONE]` sentinel or when the body closes.

use super::error::ProviderError;
use super::logging::emit_debug_payload;
use super::provider::{
    body_stream, http_client, require_api_key, resolve_base_url, send_checked, Provider,
    ProviderKind, ProviderSettings,
};
use super::stream::{decode_frame, pump_sse, spawn_producer, CompletionStream, FrameAction, SseFrame};
use crate::types::CompletionRequest;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(settings)?,
            api_key: require_api_key(ProviderKind::OpenAi, settings)?,
            endpoint: format!(
                "{}/chat/completions",
                resolve_base_url(settings, DEFAULT_BASE_URL)
            ),
        })
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        emit_debug_payload(self.name(), &self.endpoint, payload);
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(payload);
        if !self.api_key.is_empty() {
            request = request.header("authorization", format!("Bearer {}", self.api_key));
        }
        request
    }
}

fn build_payload(request: &CompletionRequest, stream: bool) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect();

    json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": messages,
        "stream": stream,
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn interpret_frame(frame: &SseFrame) -> FrameAction {
    if frame.data == "[DONE]" {
        return FrameAction::Done;
    }
    let Some(chunk) = decode_frame::<ChunkResponse>(frame) else {
        return FrameAction::Skip;
    };
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map_or(FrameAction::Skip, FrameAction::Emit)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn create_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let payload = build_payload(request, false);
        let response = send_checked(self.request(&payload), &self.endpoint).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::from_request(error, &self.endpoint))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| ProviderError::decode("OpenAI response contained no choices"))
    }

    async fn create_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let payload = build_payload(request, true);
        let response = send_checked(self.request(&payload), &self.endpoint).await?;
        let bytes = body_stream(response, &self.endpoint);
        Ok(spawn_producer("openai", move |sink| {
            pump_sse("openai", bytes, sink, interpret_frame)
        }))
    }
}
