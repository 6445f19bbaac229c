//! Anthropic messages backend, spoken as raw event-stream over HTTP.

use super::error::ProviderError;
use super::logging::emit_debug_payload;
use super::provider::{
    body_stream, http_client, require_api_key, resolve_base_url, send_checked, Provider,
    ProviderKind, ProviderSettings,
};
use super::stream::{decode_frame, pump_sse, spawn_producer, CompletionStream, FrameAction, SseFrame};
use crate::types::{CompletionRequest, Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}

impl ClaudeProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(settings)?,
            api_key: require_api_key(ProviderKind::Claude, settings)?,
            endpoint: format!("{}/messages", resolve_base_url(settings, DEFAULT_BASE_URL)),
        })
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        emit_debug_payload(self.name(), &self.endpoint, payload);
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload);
        if !self.api_key.is_empty() {
            request = request.header("x-api-key", &self.api_key);
        }
        request
    }
}

/// Splits off the leading system prompt and folds every later system turn
/// into user content, merging neighbours so roles strictly alternate.
fn normalize_messages(messages: &[Message]) -> (Option<String>, Vec<ClaudeMessage>) {
    let mut iter = messages.iter().peekable();
    let system = match iter.peek() {
        Some(first) if first.role == Role::System => iter.next().map(|m| m.content.clone()),
        _ => None,
    };

    let mut out: Vec<ClaudeMessage> = Vec::new();
    for message in iter {
        if message.content.trim().is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };
        match out.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => out.push(ClaudeMessage {
                role,
                content: message.content.clone(),
            }),
        }
    }

    // The API requires the conversation to open with a user turn.
    if out.first().is_some_and(|m| m.role == "assistant") {
        out.insert(
            0,
            ClaudeMessage {
                role: "user",
                content: "(continuing)".to_string(),
            },
        );
    }

    (system, out)
}

fn build_payload(request: &CompletionRequest, stream: bool) -> Result<Value, ProviderError> {
    let (system, messages) = normalize_messages(&request.messages);
    if messages.is_empty() {
        return Err(ProviderError::invalid_request(
            "no valid messages to send to Claude",
        ));
    }

    let mut payload = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": messages,
        "stream": stream,
    });
    if let (Some(system), Some(object)) = (system, payload.as_object_mut()) {
        object.insert("system".to_string(), Value::String(system));
    }
    Ok(payload)
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeStreamEvent {
    ContentBlockDelta {
        delta: TextDelta,
    },
    MessageStop,
    Error {
        #[serde(default)]
        error: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

fn interpret_frame(frame: &SseFrame) -> FrameAction {
    if frame.data == "[DONE]" {
        return FrameAction::Done;
    }
    let Some(event) = decode_frame::<ClaudeStreamEvent>(frame) else {
        return FrameAction::Skip;
    };
    match event {
        ClaudeStreamEvent::ContentBlockDelta { delta } => {
            delta.text.map_or(FrameAction::Skip, FrameAction::Emit)
        }
        ClaudeStreamEvent::MessageStop => FrameAction::Done,
        ClaudeStreamEvent::Error { error } => {
            tracing::warn!(provider = "claude", %error, "stream reported error");
            FrameAction::Done
        }
        ClaudeStreamEvent::Other => FrameAction::Skip,
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    async fn create_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let payload = build_payload(request, false)?;
        let response = send_checked(self.request(&payload), &self.endpoint).await?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::from_request(error, &self.endpoint))?;

        Ok(body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text)
            .collect())
    }

    async fn create_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let payload = build_payload(request, true)?;
        let response = send_checked(self.request(&payload), &self.endpoint).await?;
        let bytes = body_stream(response, &self.endpoint);
        Ok(spawn_producer("claude", move |sink| {
            pump_sse("claude", bytes, sink, interpret_frame)
        }))
    }
}
