use crate::api::{create_provider_named, Provider, ProviderError, ProviderKind};
use crate::config::{Config, SystemContext};
use crate::types::{Message, Mode, StreamEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Most recent messages carried across a mode switch or reset.
pub const SHARED_HISTORY_LIMIT: usize = 5;
/// Bound of the terminal output ring buffer.
pub const TERMINAL_OUTPUT_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("a completion is already in progress")]
    Busy,
}

/// Completion lifecycle as seen by the event gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Idle,
    Blocking,
    Streaming,
    /// The streaming call has published its terminal event and is wrapping up.
    Settled,
}

struct GateState {
    phase: Phase,
    /// Fresh per streaming call; cancelled by an interrupt.
    cancel: CancellationToken,
}

/// Serialises everything that reaches the caller's event channel, so an
/// interrupt and a final event can never both be delivered for one call.
pub(super) struct StreamGate {
    state: Mutex<GateState>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamGate {
    fn new(events_tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            state: Mutex::new(GateState {
                phase: Phase::Idle,
                cancel: CancellationToken::new(),
            }),
            events_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// A settled call is finishing up and no longer counts as running.
    pub(super) fn is_running(&self) -> bool {
        matches!(self.phase(), Phase::Blocking | Phase::Streaming)
    }

    pub(super) fn begin(&self, phase: Phase) -> Result<RunningGuard<'_>, EngineError> {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return Err(EngineError::Busy);
        }
        state.phase = phase;
        state.cancel = CancellationToken::new();
        Ok(RunningGuard { gate: self })
    }

    /// Token of the current call; resolves `cancelled()` once interrupted.
    pub(super) fn cancel_token(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }

    /// Publishes a non-terminal event; false once the call was interrupted.
    pub(super) fn forward(&self, event: StreamEvent) -> bool {
        let state = self.lock();
        if state.phase != Phase::Streaming {
            return false;
        }
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.events_tx.send(event);
        true
    }

    /// Publishes the terminal event of a streaming call unless an interrupt won.
    pub(super) fn settle(&self, event: StreamEvent) -> bool {
        let mut state = self.lock();
        if state.phase != Phase::Streaming {
            return false;
        }
        state.phase = Phase::Settled;
        let _ = self.events_tx.send(event);
        true
    }

    pub(super) fn interrupt(&self) -> bool {
        let mut state = self.lock();
        if state.phase != Phase::Streaming {
            return false;
        }
        state.phase = Phase::Settled;
        let _ = self.events_tx.send(StreamEvent::interrupted());
        state.cancel.cancel();
        true
    }
}

/// Returns the gate to idle when a completion ends, whichever way it ends.
pub(super) struct RunningGuard<'a> {
    gate: &'a StreamGate,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.gate.lock().phase = Phase::Idle;
    }
}

/// Cloneable handle that stops forwarding of an in-flight streaming
/// completion while the engine itself is mutably borrowed by that call.
#[derive(Clone)]
pub struct InterruptHandle {
    gate: Arc<StreamGate>,
}

impl InterruptHandle {
    /// Returns false when no streaming completion was running.
    pub fn interrupt(&self) -> bool {
        let interrupted = self.gate.interrupt();
        if interrupted {
            tracing::info!("streaming completion interrupted");
        }
        interrupted
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }
}

pub struct ConversationEngine {
    pub(super) provider: Box<dyn Provider>,
    pub(super) model: String,
    pub(super) temperature: f32,
    pub(super) max_tokens: u32,
    pub(super) system: SystemContext,
    pub(super) preferences: String,
    pub(super) mode: Mode,
    pub(super) mode_explicit: bool,
    pub(super) exec_history: Vec<Message>,
    pub(super) chat_history: Vec<Message>,
    pub(super) shared_history: Vec<Message>,
    pub(super) terminal_outputs: VecDeque<String>,
    pub(super) pipe: Option<String>,
    pub(super) gate: Arc<StreamGate>,
}

impl ConversationEngine {
    /// Builds the provider named in the configuration and binds an engine to it.
    ///
    /// The returned receiver is the caller's stream-event source.
    pub fn from_config(
        config: &Config,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent>), EngineError> {
        let provider = create_provider_named(&config.ai.provider, &config.ai.provider_settings())?;
        tracing::info!(
            provider = provider.name(),
            model = %config.ai.model,
            "conversation engine ready"
        );
        Ok(Self::new(provider, config))
    }

    pub fn new(
        provider: Box<dyn Provider>,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let model = if config.ai.model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            config.ai.model.clone()
        };

        let engine = Self {
            provider,
            model,
            temperature: config.ai.temperature,
            max_tokens: config.ai.max_tokens,
            system: config.system.clone(),
            preferences: config.user.preferences.clone(),
            mode: config.user.default_mode,
            mode_explicit: false,
            exec_history: Vec::new(),
            chat_history: Vec::new(),
            shared_history: Vec::new(),
            terminal_outputs: VecDeque::with_capacity(TERMINAL_OUTPUT_LIMIT),
            pipe: None,
            gate: Arc::new(StreamGate::new(events_tx)),
        };
        (engine, events_rx)
    }

    /// Records that the caller asked for a mode explicitly, which stops
    /// `set_pipe` from picking one.
    pub fn with_explicit_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self.mode_explicit = true;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn history(&self, mode: Mode) -> &[Message] {
        match mode {
            Mode::Exec => &self.exec_history,
            Mode::Chat => &self.chat_history,
        }
    }

    pub fn shared_history(&self) -> &[Message] {
        &self.shared_history
    }

    pub fn terminal_outputs(&self) -> impl ExactSizeIterator<Item = &str> {
        self.terminal_outputs.iter().map(String::as_str)
    }

    pub fn pipe(&self) -> Option<&str> {
        self.pipe.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            gate: Arc::clone(&self.gate),
        }
    }

    /// Stops forwarding of the in-flight streaming completion and delivers
    /// one interrupted event. Does nothing when no stream is running.
    pub fn interrupt(&self) -> bool {
        self.interrupt_handle().interrupt()
    }
}
