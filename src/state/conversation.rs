mod core;
mod history;
mod prompt;
mod state;
mod streaming;

#[cfg(test)]
mod tests;

pub use state::{
    ConversationEngine, EngineError, InterruptHandle, SHARED_HISTORY_LIMIT,
    TERMINAL_OUTPUT_LIMIT,
};

#[cfg(test)]
use self::core::*;
