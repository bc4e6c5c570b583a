//! The [`LLM`] contract every concrete provider implements.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, Response, StreamChunk};
use crate::tool::ToolSchema;

/// Default channel capacity for streamed chunks; decouples the SSE reader
/// task from a slow consumer without unbounded buffering.
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// A concrete implementation of the LLM contract against one back end API.
///
/// Every provider satisfies [`LLM::chat`] and [`LLM::complete`]. Tool-schema
/// advertisement and streaming are extension capabilities: providers that
/// don't support native function-calling simply ignore the schema list
/// passed to [`LLM::chat_with_tools`] (the default implementation falls
/// back to plain [`LLM::chat`]), and providers that don't support streaming
/// return an error from [`LLM::chat_stream`] rather than panicking —
/// callers check [`LLM::supports_streaming`] first.
///
/// Every method takes an optional [`CancellationToken`]. Implementations
/// must check it before issuing a request and race it against any in-flight
/// HTTP call and retry backoff, returning [`AgentError::Cancelled`] as soon
/// as it fires rather than letting the request run to completion.
#[async_trait]
pub trait LLM: Send + Sync {
    /// Send a role-tagged message sequence and get back one [`Response`].
    async fn chat(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError>;

    /// Extended form of [`LLM::chat`] that additionally advertises a tool
    /// catalog to providers with native function-calling support. Providers
    /// without that capability ignore `schemas` and behave like
    /// [`LLM::chat`].
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _schemas: &[ToolSchema],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        self.chat(messages, cancellation).await
    }

    /// Convenience wrapper over `chat` for a single user-role prompt.
    async fn complete(
        &self,
        prompt: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError> {
        let response = self.chat(&[Message::user(prompt)], cancellation).await?;
        Ok(response.content)
    }

    /// Whether this provider implements [`LLM::chat_stream`].
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Open a streamed chat completion. The returned channel is closed
    /// exactly once, on every termination path (stream-end sentinel, EOF,
    /// cancellation, or parse error); a terminal error is delivered as one
    /// error [`StreamChunk`] rather than by closing the channel silently.
    async fn chat_stream(
        &self,
        _messages: &[Message],
        _cancellation: Option<&CancellationToken>,
    ) -> Result<mpsc::Receiver<StreamChunk>, AgentError> {
        Err(AgentError::InvalidArgument(
            "this provider does not support streaming".to_string(),
        ))
    }
}
