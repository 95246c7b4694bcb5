//! Embedding and generation backends behind a single provider abstraction.

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use error::LlmError;
pub use provider::LlmProvider;
