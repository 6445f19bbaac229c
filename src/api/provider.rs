use super::claude::ClaudeProvider;
use super::error::ProviderError;
use super::gemini::GeminiProvider;
use super::openai::OpenAiProvider;
use super::stream::{ByteStream, CompletionStream};
use crate::types::CompletionRequest;
use crate::util::is_local_endpoint_url;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Claude,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn available_models(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &[
                "gpt-3.5-turbo",
                "gpt-3.5-turbo-16k",
                "gpt-4",
                "gpt-4-32k",
                "gpt-4-turbo",
            ],
            ProviderKind::Claude => &[
                "claude-3-opus-20240229",
                "claude-3-sonnet-20240229",
                "claude-3-haiku-20240307",
                "claude-2.1",
                "claude-2.0",
                "claude-instant-1.2",
            ],
            ProviderKind::Gemini => &[
                "gemini-2.5-pro-exp-03-25",
                "gemini-2.0-flash",
                "gemini-2.0-flash-lite",
                "gemini-2.0-pro",
                "gemini-1.5-flash",
                "gemini-1.5-flash-8b",
                "gemini-1.5-pro",
            ],
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-3.5-turbo",
            ProviderKind::Claude => "claude-3-haiku-20240307",
            ProviderKind::Gemini => "gemini-2.0-flash",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            _ => Err(ProviderError::unsupported(value)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings shared by every backend.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub proxy: Option<String>,
    /// Overrides the vendor's API root (gateways, local servers, tests).
    pub base_url: Option<String>,
}

/// Uniform surface over the vendor completion protocols.
///
/// Every stream handed out by `create_completion_stream` delivers exactly one
/// final event, including when the transport fails mid-way.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn available_models(&self) -> &'static [&'static str] {
        self.kind().available_models()
    }

    fn default_model(&self) -> &'static str {
        self.kind().default_model()
    }

    async fn create_completion(&self, request: &CompletionRequest)
        -> Result<String, ProviderError>;

    async fn create_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;
}

pub fn create_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<Box<dyn Provider>, ProviderError> {
    let provider: Box<dyn Provider> = match kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(settings)?),
        ProviderKind::Claude => Box::new(ClaudeProvider::new(settings)?),
        ProviderKind::Gemini => Box::new(GeminiProvider::new(settings)?),
    };
    tracing::debug!(provider = provider.name(), "provider created");
    Ok(provider)
}

/// Factory entry point for a provider identifier coming from configuration.
pub fn create_provider_named(
    name: &str,
    settings: &ProviderSettings,
) -> Result<Box<dyn Provider>, ProviderError> {
    create_provider(name.parse()?, settings)
}

pub(super) fn http_client(settings: &ProviderSettings) -> Result<reqwest::Client, ProviderError> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
    let proxy = settings.proxy.as_deref().map(str::trim).filter(|p| !p.is_empty());
    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|error| {
            ProviderError::configuration(format!("invalid proxy url '{proxy_url}': {error}"))
        })?;
        builder = builder.proxy(proxy);
    } else if settings
        .base_url
        .as_deref()
        .is_some_and(is_local_endpoint_url)
    {
        // Local gateways never go through the system proxy.
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|error| ProviderError::configuration(format!("cannot build HTTP client: {error}")))
}

pub(super) fn require_api_key(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<String, ProviderError> {
    let key = settings.api_key.trim();
    let local_endpoint = settings
        .base_url
        .as_deref()
        .is_some_and(is_local_endpoint_url);
    if key.is_empty() && !local_endpoint {
        return Err(ProviderError::configuration(format!(
            "API key is required for {kind} provider"
        )));
    }
    Ok(key.to_string())
}

pub(super) fn resolve_base_url(settings: &ProviderSettings, default: &str) -> String {
    settings
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Sends a prepared request, turning non-success statuses into errors that
/// carry the response body.
pub(super) async fn send_checked(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<reqwest::Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|error| ProviderError::from_request(error, endpoint))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(endpoint, status, &body));
    }
    Ok(response)
}

pub(super) fn body_stream(response: reqwest::Response, endpoint: &str) -> ByteStream {
    let endpoint = endpoint.to_string();
    Box::pin(
        response
            .bytes_stream()
            .map(move |item| item.map_err(|error| ProviderError::from_request(error, &endpoint))),
    )
}
