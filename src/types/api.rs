use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation mode; selects the active history and the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Exec,
    Chat,
}

impl Mode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exec" | "command" | "cmd" => Some(Mode::Exec),
            "chat" => Some(Mode::Chat),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Mode::Exec => Mode::Chat,
            Mode::Chat => Mode::Exec,
        }
    }

    /// Human label used in prompts and notices.
    pub fn label(self) -> &'static str {
        match self {
            Mode::Exec => "command",
            Mode::Chat => "chat",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Exec => f.write_str("exec"),
            Mode::Chat => f.write_str("chat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<Message>,
    pub stream: bool,
}

/// One unit of a streamed completion.
///
/// Providers only ever produce deltas and a single final event. The engine
/// adds the interrupted and executable flags when it republishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    pub content: String,
    pub is_final: bool,
    pub is_interrupted: bool,
    pub is_executable: bool,
}

impl StreamEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            is_final: true,
            ..Self::default()
        }
    }

    pub fn finished(executable: bool) -> Self {
        Self {
            is_final: true,
            is_executable: executable,
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            content: "[Interrupt]".to_string(),
            is_interrupted: true,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_final || self.is_interrupted
    }
}

/// Structured answer of an exec-mode completion.
///
/// Field names follow the JSON shape the exec system prompt asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(rename = "exp", default)]
    pub explanation: String,
    #[serde(rename = "exec")]
    pub executable: bool,
}

impl ExecResult {
    pub fn unstructured(text: impl Into<String>) -> Self {
        Self {
            command: String::new(),
            explanation: text.into(),
            executable: false,
        }
    }
}
