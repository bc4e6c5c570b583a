//! Agent control loops.
//!
//! Three strategies share a tool registry, a bounded iteration count, and a
//! [`ConversationHistory`]: [`function_calling::FunctionCallingAgent`] (native
//! tool-call providers), [`react::ReactAgent`] (prompt-parsed ReAct, any
//! provider), and [`conversational::ConversationalAgent`] (no tool dispatch,
//! pluggable memory compaction). All three implement [`Agent`].

pub mod conversational;
pub mod function_calling;
pub mod react;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, Response};
use crate::tool::Tool;

pub use conversational::{ConversationalAgent, ConversationalAgentBuilder};
pub use function_calling::{FunctionCallingAgent, FunctionCallingAgentBuilder};
pub use react::{ReactAgent, ReactAgentBuilder, TraceStep};

/// Default iteration bound for every strategy.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// The control-loop capability every agent strategy implements.
///
/// `run` is not safe to call concurrently on the same instance — the
/// contract is single-caller per agent, matching the history/registry
/// ownership described in spec §5.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Map one free-text input to a final model response, dispatching tools
    /// along the way per the strategy's loop. Returns
    /// [`AgentError::IterationLimitExceeded`] if the bound is hit before a
    /// terminal response is produced.
    ///
    /// `cancellation`, if given, is checked at each loop iteration boundary
    /// and threaded into the LLM call and any tool dispatch. On
    /// cancellation, `run` returns [`AgentError::Cancelled`] without
    /// appending a partial response to history.
    async fn run(
        &mut self,
        input: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError>;

    /// Register a tool. Must be called before `run`; concurrent `add_tool`
    /// and `run` is undefined per spec §5.
    fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError>;

    /// Clear history back to just the system prompt (if any) and any
    /// per-strategy scratch state (e.g. a ReAct trace).
    fn reset(&mut self) -> Result<(), AgentError>;

    /// The conversation history accumulated so far.
    fn history(&self) -> &[Message];
}

/// An ordered sequence of [`Message`]s owned by an agent.
///
/// Append-only from the outside; a [`crate::memory::MemoryStrategy`] may
/// rewrite it (dropping or replacing prefixes) between iterations via
/// [`ConversationHistory::messages_mut`]. `reset` restores it to exactly the
/// system prompt, matching `Agent::reset`.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    system_prompt: Option<String>,
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new(system_prompt: Option<String>) -> Self {
        let mut history = Self {
            system_prompt,
            messages: Vec::new(),
        };
        history.reset();
        history
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Mutable access for in-place memory compaction. The caller is
    /// responsible for preserving the invariants compaction strategies
    /// document (current-turn message never dropped).
    pub fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        if let Some(prompt) = &self.system_prompt {
            self.messages.push(Message::system(prompt.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn new_seeds_only_the_system_prompt() {
        let history = ConversationHistory::new(Some("be terse".to_string()));
        assert_eq!(history.len(), 1);
        assert_eq!(history.as_slice()[0].role, Role::System);
    }

    #[test]
    fn reset_clears_back_to_system_prompt() {
        let mut history = ConversationHistory::new(Some("be terse".to_string()));
        history.push(Message::user("hello"));
        history.push(Message::assistant("hi"));
        assert_eq!(history.len(), 3);
        history.reset();
        assert_eq!(history.len(), 1);
        assert_eq!(history.as_slice()[0].content, "be terse");
    }

    #[test]
    fn reset_with_no_system_prompt_yields_empty_history() {
        let mut history = ConversationHistory::new(None);
        history.push(Message::user("hello"));
        history.reset();
        assert!(history.is_empty());
    }
}
