use super::{ConversationEngine, SHARED_HISTORY_LIMIT, TERMINAL_OUTPUT_LIMIT};
use crate::classify::looks_like_command;
use crate::types::{Message, Mode};

impl ConversationEngine {
    /// Switches the active history. The tail of the history being left is
    /// kept as shared context for the next first turn.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        self.snapshot_shared_history();
        tracing::debug!(from = %self.mode, to = %mode, "mode switched");
        self.mode = mode;
    }

    pub fn add_terminal_output(&mut self, output: &str) {
        if output.trim().is_empty() {
            return;
        }
        while self.terminal_outputs.len() >= TERMINAL_OUTPUT_LIMIT {
            self.terminal_outputs.pop_front();
        }
        self.terminal_outputs.push_back(output.to_string());
    }

    /// Stores piped input. Unless a mode was requested explicitly, the input
    /// also decides the starting mode.
    pub fn set_pipe(&mut self, pipe: &str) {
        if pipe.trim().is_empty() {
            return;
        }
        self.pipe = Some(pipe.to_string());

        if !self.mode_explicit {
            let mode = if looks_like_command(pipe) {
                Mode::Exec
            } else {
                Mode::Chat
            };
            tracing::debug!(%mode, "mode picked from piped input");
            self.set_mode(mode);
        }
    }

    /// Empties the active history only.
    pub fn clear(&mut self) {
        self.current_history_mut().clear();
    }

    pub fn reset(&mut self) {
        self.snapshot_shared_history();
        self.exec_history.clear();
        self.chat_history.clear();
    }

    pub(super) fn current_history(&self) -> &[Message] {
        self.history(self.mode)
    }

    pub(super) fn current_history_mut(&mut self) -> &mut Vec<Message> {
        match self.mode {
            Mode::Exec => &mut self.exec_history,
            Mode::Chat => &mut self.chat_history,
        }
    }

    pub(super) fn push_user_message(&mut self, content: &str) {
        self.current_history_mut().push(Message::user(content));
    }

    pub(super) fn push_assistant_message(&mut self, content: String) {
        self.current_history_mut().push(Message::assistant(content));
    }

    fn snapshot_shared_history(&mut self) {
        self.shared_history = history_tail(self.current_history(), SHARED_HISTORY_LIMIT).to_vec();
    }
}

pub(super) fn history_tail(history: &[Message], limit: usize) -> &[Message] {
    &history[history.len().saturating_sub(limit)..]
}
