//! Provider adapters: one request/response and one streaming contract over
//! the OpenAI, Anthropic and Gemini wire protocols.

mod claude;
mod error;
mod gemini;
pub mod logging;
#[cfg(test)]
pub(crate) mod mock_client;
mod openai;
mod provider;
pub mod stream;

pub use claude::ClaudeProvider;
pub use error::{ProviderError, ProviderErrorKind};
pub use gemini::{GeminiChunks, GeminiProvider};
#[cfg(test)]
pub(crate) use mock_client::{MockProvider, MockStream};
pub use openai::OpenAiProvider;
pub use provider::{
    create_provider, create_provider_named, Provider, ProviderKind, ProviderSettings,
};
pub use stream::{ByteStream, CompletionStream};
