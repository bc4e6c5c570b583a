//! agentflow — a provider-agnostic framework for LLM-driven agents.
//!
//! Three subsystems do the work: [`provider`]/[`providers`] (a uniform
//! chat/stream contract over OpenAI-, Claude-, Gemini-, and Ollama-shaped
//! back ends), [`agent`] (function-calling, ReAct, and conversational
//! control loops sharing a [`tool::ToolRegistry`]), and [`tools`] (a
//! sandboxed filesystem tool plus illustrative calculator/HTTP tools).
//! [`memory`] supplies pluggable conversation-history compaction for the
//! conversational agent.
//!
//! ```rust,no_run
//! use agentflow::agent::{Agent, FunctionCallingAgent};
//! use agentflow::providers::OpenAIProviderBuilder;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), agentflow::error::AgentError> {
//! let llm = Arc::new(OpenAIProviderBuilder::new().api_key("sk-...").build()?);
//! let mut agent = FunctionCallingAgent::builder().llm(llm).build()?;
//! let response = agent.run("What is 25+34?", None).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod providers;
pub mod tool;
pub mod tools;

pub use agent::Agent;
pub use error::AgentError;
pub use message::{Message, Response, Role, StreamChunk, ToolCall, ToolValue};
pub use provider::LLM;
pub use tool::{Tool, ToolRegistry, ToolSchema};
