use super::state::Phase;
use super::{ConversationEngine, EngineError};
use crate::types::ExecResult;
use regex::Regex;
use std::sync::LazyLock;

static FIRST_BRACES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)\{.*?\}").ok());

impl ConversationEngine {
    /// Blocking exec-mode completion.
    ///
    /// Only transport failures come back as errors; a reply that is not the
    /// expected JSON degrades to an unstructured, non-executable result.
    pub async fn exec_completion(&mut self, input: &str) -> Result<ExecResult, EngineError> {
        let gate = std::sync::Arc::clone(&self.gate);
        let _running = gate.begin(Phase::Blocking)?;

        self.push_user_message(input);
        let request = self.build_request(false);
        tracing::debug!(
            provider = self.provider.name(),
            model = %request.model,
            messages = request.messages.len(),
            "exec completion requested"
        );

        let response = self.provider.create_completion(&request).await?;
        self.push_assistant_message(response.clone());

        let result = parse_exec_result(&response);
        tracing::debug!(executable = result.executable, "exec completion parsed");
        Ok(result)
    }
}

pub(super) fn parse_exec_result(raw: &str) -> ExecResult {
    if let Ok(result) = serde_json::from_str::<ExecResult>(raw.trim()) {
        return result;
    }

    let braced = FIRST_BRACES
        .as_ref()
        .and_then(|regex| regex.find(raw))
        .and_then(|found| serde_json::from_str::<ExecResult>(found.as_str()).ok());
    if let Some(result) = braced {
        return result;
    }

    if let Some(result) = first_embedded_object(raw) {
        return result;
    }

    tracing::debug!("exec reply is not structured, returning it as explanation");
    ExecResult::unstructured(raw)
}

/// Scans for a complete JSON object starting at each `{`, which handles
/// commands that contain braces themselves (awk programs, shell groups).
fn first_embedded_object(raw: &str) -> Option<ExecResult> {
    raw.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&raw[start..])
            .into_iter::<ExecResult>()
            .next()
            .and_then(Result::ok)
    })
}
