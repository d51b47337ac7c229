pub mod client;
pub mod error;
mod gemini;
pub mod mock;
mod openrouter;

pub use client::{
    Completion, CompletionClient, CompletionRequest, LlmClient, OBSERVATION_MAX_TOKENS,
    SUMMARY_MAX_TOKENS,
};
pub use error::LlmError;
pub use mock::MockClient;
