//! Google Gemini backend.
//!
//! Gemini has no separate system turn here: the whole conversation is
//! flattened into one prompt with the system text at its head. Streaming is
//! consumed through a pull iterator that yields each candidate chunk as-is.

use super::error::ProviderError;
use super::logging::emit_debug_payload;
use super::provider::{
    body_stream, http_client, require_api_key, resolve_base_url, send_checked, Provider,
    ProviderKind, ProviderSettings,
};
use super::stream::{
    decode_frame, spawn_producer, ByteStream, ChunkSink, CompletionStream, SseFrame,
    StreamParser,
};
use crate::types::{CompletionRequest, Message, Role};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client(settings)?,
            api_key: require_api_key(ProviderKind::Gemini, settings)?,
            base_url: resolve_base_url(settings, DEFAULT_BASE_URL),
        })
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{model}:streamGenerateContent?alt=sse",
                self.base_url
            )
        } else {
            format!("{}/models/{model}:generateContent", self.base_url)
        }
    }

    fn request(&self, endpoint: &str, payload: &Value) -> reqwest::RequestBuilder {
        emit_debug_payload(self.name(), endpoint, payload);
        let mut request = self
            .http
            .post(endpoint)
            .header("content-type", "application/json")
            .json(payload);
        if !self.api_key.is_empty() {
            request = request.header("x-goog-api-key", &self.api_key);
        }
        request
    }
}

fn flatten_prompt(messages: &[Message]) -> Result<String, ProviderError> {
    let mut prompt = String::new();

    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    if !system.is_empty() {
        prompt.push_str("System Instructions: ");
        prompt.push_str(&system.join("\n\n"));
        prompt.push_str("\n\n");
    }

    let mut turns = 0;
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::User => prompt.push_str("User: "),
            Role::Assistant => prompt.push_str("Assistant: "),
            Role::System => {}
        }
        prompt.push_str(&message.content);
        prompt.push_str("\n\n");
        turns += 1;
    }
    if turns == 0 {
        return Err(ProviderError::invalid_request(
            "no valid messages to send to Gemini",
        ));
    }

    prompt.push_str("Assistant: ");
    Ok(prompt)
}

fn build_payload(request: &CompletionRequest) -> Result<Value, ProviderError> {
    let prompt = flatten_prompt(&request.messages)?;
    let mut generation_config = json!({ "temperature": request.temperature });
    if request.max_tokens > 0 {
        generation_config["maxOutputTokens"] = json!(request.max_tokens);
    }
    Ok(json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    }))
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate, if it is text.
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Pull iterator over a streamed generation.
pub struct GeminiChunks {
    bytes: ByteStream,
    parser: StreamParser,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl GeminiChunks {
    pub fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            parser: StreamParser::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next text chunk; `None` once iteration is over.
    pub async fn next(&mut self) -> Option<Result<String, ProviderError>> {
        loop {
            if let Some(text) = self.pending.pop_front() {
                return Some(Ok(text));
            }
            if self.exhausted {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = self.parser.process(&chunk);
                    self.queue(frames);
                }
                Some(Err(error)) => {
                    self.exhausted = true;
                    return Some(Err(error));
                }
                None => {
                    self.exhausted = true;
                    let rest = self.parser.finish();
                    self.queue(rest);
                }
            }
        }
    }

    fn queue(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            if let Some(text) = decode_frame::<GenerateResponse>(&frame)
                .and_then(GenerateResponse::first_text)
                .filter(|text| !text.is_empty())
            {
                self.pending.push_back(text);
            }
        }
    }
}

async fn drain_chunks(mut chunks: GeminiChunks, mut sink: ChunkSink) -> ChunkSink {
    while let Some(item) = chunks.next().await {
        match item {
            Ok(text) => {
                if !sink.delta(text).await {
                    return sink;
                }
            }
            Err(error) => {
                tracing::warn!(provider = "gemini", %error, "stream read failed");
                break;
            }
        }
    }
    sink.done().await;
    sink
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn create_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let payload = build_payload(request)?;
        let endpoint = self.endpoint(&request.model, false);
        let response = send_checked(self.request(&endpoint, &payload), &endpoint).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::from_request(error, &endpoint))?;

        body.first_text()
            .ok_or_else(|| ProviderError::decode("no content generated"))
    }

    async fn create_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let payload = build_payload(request)?;
        let endpoint = self.endpoint(&request.model, true);
        let response = send_checked(self.request(&endpoint, &payload), &endpoint).await?;
        let chunks = GeminiChunks::new(body_stream(response, &endpoint));
        Ok(spawn_producer("gemini", move |sink| drain_chunks(chunks, sink)))
    }
}
