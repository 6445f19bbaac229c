use super::error::ProviderError;
use super::provider::{Provider, ProviderKind};
use super::stream::CompletionStream;
use crate::types::{CompletionRequest, StreamEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Canned stream handed out by [`MockProvider`].
pub enum MockStream {
    /// Deltas in order, then a done event unless `done` is false, in which
    /// case the channel simply closes.
    Scripted { chunks: Vec<String>, done: bool },
    /// Events pushed by the test through the paired sender.
    Live(mpsc::Receiver<StreamEvent>),
    /// Opening the stream fails with a network error.
    Fail(String),
    /// Opening the stream never completes, like a server that never answers.
    Hang,
}

impl MockStream {
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockStream::Scripted {
            chunks: chunks.into_iter().map(Into::into).collect(),
            done: true,
        }
    }

    pub fn without_done<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockStream::Scripted {
            chunks: chunks.into_iter().map(Into::into).collect(),
            done: false,
        }
    }

    /// A stream driven by hand; the capacity matches real backends.
    pub fn live() -> (Self, mpsc::Sender<StreamEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (MockStream::Live(rx), tx)
    }
}

#[derive(Default)]
struct MockState {
    completions: VecDeque<Result<String, String>>,
    streams: VecDeque<MockStream>,
    requests: Vec<CompletionRequest>,
}

/// Provider that replays queued responses and records every request.
#[derive(Clone)]
pub struct MockProvider {
    kind: ProviderKind,
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn push_completion(&self, text: impl Into<String>) -> &Self {
        self.lock().completions.push_back(Ok(text.into()));
        self
    }

    pub fn push_completion_error(&self, message: impl Into<String>) -> &Self {
        self.lock().completions.push_back(Err(message.into()));
        self
    }

    pub fn push_stream(&self, stream: MockStream) -> &Self {
        self.lock().streams.push_back(stream);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        match state.completions.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ProviderError::network(message)),
            None => Err(ProviderError::network(
                "MockProvider: no more completions configured",
            )),
        }
    }

    async fn create_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let next = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.streams.pop_front()
        };

        match next {
            Some(MockStream::Scripted { chunks, done }) => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(StreamEvent::delta(chunk)).await.is_err() {
                            return;
                        }
                    }
                    if done {
                        let _ = tx.send(StreamEvent::done()).await;
                    }
                });
                Ok(rx)
            }
            Some(MockStream::Live(rx)) => Ok(rx),
            Some(MockStream::Fail(message)) => Err(ProviderError::network(message)),
            Some(MockStream::Hang) => std::future::pending().await,
            None => Err(ProviderError::network(
                "MockProvider: no more streams configured",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".to_string(),
            max_tokens: 10,
            temperature: 0.0,
            messages: vec![Message::user("hi")],
            stream: false,
        }
    }

    #[tokio::test]
    async fn test_completions_replay_in_order_then_fail() {
        let provider = MockProvider::new(ProviderKind::OpenAi);
        provider.push_completion("one").push_completion_error("down");

        assert_eq!(provider.create_completion(&request()).await.unwrap(), "one");
        assert!(provider.create_completion(&request()).await.is_err());
        assert!(provider.create_completion(&request()).await.is_err());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_stream_without_done_just_closes() {
        let provider = MockProvider::new(ProviderKind::Gemini);
        provider.push_stream(MockStream::without_done(["a"]));
        let mut rx = provider.create_completion_stream(&request()).await.unwrap();
        assert_eq!(rx.recv().await, Some(StreamEvent::delta("a")));
        assert_eq!(rx.recv().await, None);
    }
}
