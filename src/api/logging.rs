use crate::util::parse_bool_str;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};

const DEFAULT_API_LOG_PATH: &str = "/tmp/yai-debug-payload.log";
const DEBUG_PAYLOAD_ENV: &str = "YAI_DEBUG_PAYLOAD";
const API_LOG_PATH_ENV: &str = "YAI_API_LOG_PATH";

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .and_then(|v| parse_bool_str(&v))
        .unwrap_or(false)
}

/// Dumps an outgoing request body. Callers pass the body only, never headers.
pub fn emit_debug_payload(provider: &str, request_url: &str, payload: &Value) {
    if !debug_payload_enabled() {
        return;
    }
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    let message = format!(
        "YAI_API DEBUG payload_request provider={provider} url={}\npayload:\n{formatted_payload}\n",
        redact_query(request_url)
    );
    emit_log_message(&message);
}

pub fn emit_sse_parse_error(
    event_type: Option<&str>,
    json_data: &str,
    parse_error: &serde_json::Error,
) {
    tracing::debug!(
        event_type = event_type.unwrap_or("<none>"),
        error = %parse_error,
        "skipping malformed stream frame"
    );
    if !debug_payload_enabled() {
        return;
    }
    let message = format!(
        "YAI_API ERROR sse_parse_failed error={parse_error}\nevent_type={}\ndata:\n{json_data}\n",
        event_type.unwrap_or("<none>")
    );
    emit_log_message(&message);
}

/// Query strings may carry credentials.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

fn emit_log_message(message: &str) {
    if let Some(path) = resolve_log_path() {
        if append_log_file(&path, message).is_ok() {
            return;
        }
    }

    eprintln!("{message}");
}

fn resolve_log_path() -> Option<String> {
    std::env::var(API_LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            if std::io::stderr().is_terminal() {
                Some(DEFAULT_API_LOG_PATH.to_string())
            } else {
                None
            }
        })
}

fn append_log_file(path: &str, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}
