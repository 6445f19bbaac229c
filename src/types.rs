mod api;

pub use api::{CompletionRequest, ExecResult, Message, Mode, Role, StreamEvent};
