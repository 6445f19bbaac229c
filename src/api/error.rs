use thiserror::Error;

/// Failure talking to a completion backend.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection refused, reset, timed out.
    Network,
    /// Non-success HTTP status not covered by a narrower kind.
    Http,
    /// 401 / 403
    Auth,
    /// Response body did not have the expected shape.
    Decode,
    /// Rejected before or by the backend as malformed.
    InvalidRequest,
    UnsupportedProvider,
    Configuration,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Decode, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Configuration, message)
    }

    pub fn unsupported(provider: &str) -> Self {
        Self::new(
            ProviderErrorKind::UnsupportedProvider,
            format!("unsupported provider type: {provider}"),
        )
    }

    /// Maps a non-success response to an error carrying status and body.
    pub fn from_status(endpoint: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ProviderErrorKind::Auth,
            400 | 404 | 422 => ProviderErrorKind::InvalidRequest,
            _ => ProviderErrorKind::Http,
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("API endpoint '{endpoint}' returned HTTP {status}")
        } else {
            format!("API endpoint '{endpoint}' returned HTTP {status}: {body}")
        };
        Self::new(kind, message)
    }

    /// Transport failure before a status was available.
    pub fn from_request(error: reqwest::Error, endpoint: &str) -> Self {
        if error.is_connect() {
            return Self::network(format!("cannot reach API endpoint '{endpoint}': {error}"));
        }
        if error.is_timeout() {
            return Self::network(format!("API request to '{endpoint}' timed out: {error}"));
        }
        if error.is_decode() {
            return Self::decode(format!(
                "API response from '{endpoint}' could not be decoded: {error}"
            ));
        }
        if let Some(status) = error.status() {
            return Self::from_status(endpoint, status, &error.to_string());
        }
        Self::network(format!("API request to '{endpoint}' failed: {error}"))
    }
}
