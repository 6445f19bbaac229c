pub mod conversation;

pub use conversation::{ConversationEngine, EngineError, InterruptHandle};
