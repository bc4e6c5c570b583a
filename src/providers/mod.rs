//! One concrete [`crate::provider::LLM`] implementation per back-end family.

pub mod claude;
pub mod common;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use claude::{ClaudeProvider, ClaudeProviderBuilder};
pub use gemini::{GeminiProvider, GeminiProviderBuilder};
pub use ollama::{OllamaProvider, OllamaProviderBuilder};
pub use openai::{OpenAIProvider, OpenAIProviderBuilder};
