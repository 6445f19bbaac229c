//! `yai`: a terminal assistant that turns natural language or piped input into
//! a shell command (exec mode) or a markdown answer (chat mode), backed by
//! interchangeable completion providers.

pub mod api;
pub mod classify;
pub mod config;
pub mod state;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;
