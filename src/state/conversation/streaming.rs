use super::state::Phase;
use super::{ConversationEngine, EngineError};
use crate::classify::is_executable_output;
use crate::types::{Mode, StreamEvent};
use std::sync::Arc;

enum StreamOutcome {
    Completed { signalled: bool },
    Interrupted,
}

impl ConversationEngine {
    /// Streams a completion for `input` to the event receiver.
    ///
    /// Publishes one delta event per chunk and then exactly one terminal
    /// event: a final event when the provider finishes (or closes the stream
    /// without saying so), or the interrupted event sent by [`Self::interrupt`].
    pub async fn chat_stream_completion(&mut self, input: &str) -> Result<(), EngineError> {
        let gate = Arc::clone(&self.gate);
        let _running = gate.begin(Phase::Streaming)?;

        self.push_user_message(input);
        let request = self.build_request(true);
        tracing::debug!(
            provider = self.provider.name(),
            model = %request.model,
            mode = %self.mode,
            messages = request.messages.len(),
            "stream completion requested"
        );

        let cancel = gate.cancel_token();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.provider.create_completion_stream(&request) => Some(opened),
        };
        let Some(opened) = opened else {
            self.keep_partial_output(String::new(), 0);
            return Ok(());
        };

        let mut stream = opened?;
        let mut output = String::new();
        let mut chunks = 0usize;

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamOutcome::Interrupted,
                event = stream.recv() => event,
            };

            let Some(event) = event else {
                break StreamOutcome::Completed { signalled: false };
            };

            if !event.content.is_empty() {
                if !gate.forward(StreamEvent::delta(event.content.clone())) {
                    break StreamOutcome::Interrupted;
                }
                output.push_str(&event.content);
                chunks += 1;
            }

            if event.is_final {
                break StreamOutcome::Completed { signalled: true };
            }
        };
        drop(stream);

        match outcome {
            StreamOutcome::Completed { signalled } => {
                let executable = self.mode == Mode::Exec && is_executable_output(&output);
                if gate.settle(StreamEvent::finished(executable)) {
                    tracing::debug!(chunks, signalled, executable, "stream completed");
                    self.push_assistant_message(output);
                } else {
                    // An interrupt landed between the last chunk and the final event.
                    self.keep_partial_output(output, chunks);
                }
            }
            StreamOutcome::Interrupted => self.keep_partial_output(output, chunks),
        }

        Ok(())
    }

    fn keep_partial_output(&mut self, output: String, chunks: usize) {
        tracing::debug!(chunks, "stream stopped by interrupt");
        if !output.is_empty() {
            self.push_assistant_message(output);
        }
    }
}
