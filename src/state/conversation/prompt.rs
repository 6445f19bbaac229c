use super::ConversationEngine;
use crate::classify::NOEXEC_SENTINEL;
use crate::config::SystemContext;
use crate::types::{CompletionRequest, Message, Mode};
use std::fmt::Write as _;

const EXEC_INSTRUCTIONS: &str = "You are Yai, a powerful terminal assistant generating a JSON containing a command line for my input.\n\
You will always reply using the following json structure: {\"cmd\":\"the command\", \"exp\": \"some explanation\", \"exec\": true}.\n\
Your answer will always only contain the json structure, never add any advice or supplementary detail or information, even if I asked the same question before.\n\
The field cmd will contain a single line command (don't use new lines, use separators like && and ; instead).\n\
The field exp will contain a short explanation of the command if you managed to generate an executable command, otherwise it will contain the reason of your failure.\n\
The field exec will contain true if you managed to generate an executable command, false otherwise.\n\
When you reply without the json structure and cannot produce a command, start your reply with ";

const EXEC_EXAMPLES: &str = "Examples:\n\
Me: list all files in my home dir\n\
Yai: {\"cmd\":\"ls ~\", \"exp\": \"list all files in your home dir\", \"exec\": true}\n\
Me: list all pods of all namespaces\n\
Yai: {\"cmd\":\"kubectl get pods --all-namespaces\", \"exp\": \"list pods from all k8s namespaces\", \"exec\": true}\n\
Me: how are you ?\n\
Yai: {\"cmd\":\"\", \"exp\": \"I'm good thanks but I cannot generate a command for this. Use the chat mode to discuss.\", \"exec\": false}";

const CHAT_INSTRUCTIONS: &str = "You are Yai, a powerful terminal assistant.\n\
You will answer in the most helpful possible way.\n\
Always format your answer in markdown format.\n\n\
For example:\n\
Me: What is 2+2 ?\n\
Yai: The answer for `2+2` is `4`\n\
Me: +2 again ?\n\
Yai: The answer is `6`\n";

impl ConversationEngine {
    pub(super) fn build_request(&self, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: self.prepare_messages(),
            stream,
        }
    }

    /// Ordered message list for the next request in the active mode.
    pub(super) fn prepare_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::system(system_prompt(
            self.mode,
            &self.system,
            &self.preferences,
        ))];

        if let Some(pipe) = &self.pipe {
            messages.push(Message::user(format!(
                "I will work on the following input: {pipe}"
            )));
        }

        if !self.terminal_outputs.is_empty() {
            messages.push(Message::system(terminal_outputs_block(self.terminal_outputs())));
        }

        let history = self.current_history();
        if history.is_empty() && !self.shared_history.is_empty() {
            messages.push(Message::system(format!(
                "Here is recent context from {} mode that might be relevant:",
                self.mode.toggled().label()
            )));
            messages.extend(self.shared_history.iter().cloned());
            messages.push(Message::system(format!(
                "Now continuing in {} mode:",
                self.mode.label()
            )));
        }

        messages.extend(history.iter().cloned());
        messages
    }
}

pub(super) fn system_prompt(mode: Mode, system: &SystemContext, preferences: &str) -> String {
    let body = match mode {
        Mode::Exec => format!("{EXEC_INSTRUCTIONS}{NOEXEC_SENTINEL}.\n\n{EXEC_EXAMPLES}"),
        Mode::Chat => CHAT_INSTRUCTIONS.to_string(),
    };
    format!("{body}\n{}", context_sentence(system, preferences))
}

/// Environment facts, each mentioned only when known.
pub(super) fn context_sentence(system: &SystemContext, preferences: &str) -> String {
    let facts = [
        ("my operating system is", &system.operating_system),
        ("my distribution is", &system.distribution),
        ("my home directory is", &system.home_directory),
        ("my shell is", &system.shell),
        ("my editor is", &system.editor),
    ];

    let mut sentence = String::from("My context: ");
    for (label, value) in facts {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            let _ = write!(sentence, "{label} {value}, ");
        }
    }
    sentence.push_str("take this into account.");

    let preferences = preferences.trim();
    if !preferences.is_empty() {
        let _ = write!(sentence, " Also, {preferences}.");
    }
    sentence
}

pub(super) fn terminal_outputs_block<'a>(outputs: impl Iterator<Item = &'a str>) -> String {
    let mut block = String::from("Recent terminal outputs for context:\n\n");
    for (index, output) in outputs.enumerate() {
        let _ = write!(block, "Terminal output {}:\n```\n{output}\n```\n\n", index + 1);
    }
    block
}
