//! Conversational agent loop (spec §4.D.3): no tool dispatch, bounded
//! context via a pluggable [`MemoryStrategy`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ConversationHistory};
use crate::error::AgentError;
use crate::memory::{AllStrategy, MemoryStrategy};
use crate::message::{Message, Response};
use crate::provider::LLM;
use crate::tool::Tool;

/// Builder for [`ConversationalAgent`]. Required field: `llm`. Defaults to
/// [`AllStrategy`] (no compaction) when no memory strategy is set.
pub struct ConversationalAgentBuilder {
    llm: Option<Arc<dyn LLM>>,
    system_prompt: Option<String>,
    memory: Arc<dyn MemoryStrategy>,
}

impl Default for ConversationalAgentBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: None,
            memory: Arc::new(AllStrategy),
        }
    }
}

impl ConversationalAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn llm(mut self, llm: Arc<dyn LLM>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStrategy>) -> Self {
        self.memory = memory;
        self
    }

    pub fn build(self) -> Result<ConversationalAgent, AgentError> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::InvalidArgument("conversational agent requires an llm".to_string()))?;
        Ok(ConversationalAgent {
            llm,
            history: ConversationHistory::new(self.system_prompt),
            memory: self.memory,
        })
    }
}

pub struct ConversationalAgent {
    llm: Arc<dyn LLM>,
    history: ConversationHistory,
    memory: Arc<dyn MemoryStrategy>,
}

impl ConversationalAgent {
    pub fn builder() -> ConversationalAgentBuilder {
        ConversationalAgentBuilder::new()
    }
}

#[async_trait]
impl Agent for ConversationalAgent {
    async fn run(
        &mut self,
        input: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        if cancellation.is_some_and(|t| t.is_cancelled()) {
            return Err(AgentError::Cancelled);
        }
        self.history.push(Message::user(input));
        self.memory.compact(self.history.messages_mut(), cancellation).await;

        let response = self.llm.chat(self.history.as_slice(), cancellation).await?;
        self.history.push(Message::assistant(response.content.clone()));
        Ok(response)
    }

    /// Conversational agents dispatch no tools; rejecting registration here
    /// surfaces the mismatch at call time instead of silently discarding it.
    fn add_tool(&mut self, _tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        Err(AgentError::InvalidArgument(
            "conversational agent does not dispatch tools".to_string(),
        ))
    }

    fn reset(&mut self) -> Result<(), AgentError> {
        self.history.reset();
        Ok(())
    }

    fn history(&self) -> &[Message] {
        self.history.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::WindowStrategy;
    use crate::message::ResponseMetadata;
    use std::sync::Mutex;

    struct EchoLLM {
        calls: Mutex<Vec<usize>>,
    }

    impl EchoLLM {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLM for EchoLLM {
        async fn chat(
            &self,
            messages: &[Message],
            _cancellation: Option<&CancellationToken>,
        ) -> Result<Response, AgentError> {
            self.calls.lock().unwrap().push(messages.len());
            Ok(Response {
                content: "ok".to_string(),
                tool_calls: Vec::new(),
                metadata: ResponseMetadata::default(),
            })
        }
    }

    #[tokio::test]
    async fn plain_run_appends_user_then_assistant() {
        let llm = Arc::new(EchoLLM::new());
        let mut agent = ConversationalAgent::builder().llm(llm).build().unwrap();

        let response = agent.run("hello", None).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(agent.history().len(), 2);
    }

    // spec §8 S6: six user turns against a Window(4) agent; by the sixth
    // call the LLM sees exactly 4 messages (system + 3 most recent).
    #[tokio::test]
    async fn s6_memory_window_caps_history_seen_by_llm() {
        let llm = Arc::new(EchoLLM::new());
        let mut agent = ConversationalAgent::builder()
            .llm(llm.clone())
            .system_prompt("be terse")
            .memory(Arc::new(WindowStrategy::new(4)))
            .build()
            .unwrap();

        for i in 0..6 {
            agent.run(&format!("turn {}", i), None).await.unwrap();
        }

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 6);
        assert_eq!(*calls.last().unwrap(), 4);
    }

    #[tokio::test]
    async fn add_tool_is_rejected() {
        struct NoopTool;
        #[async_trait]
        impl Tool for NoopTool {
            fn name(&self) -> &str {
                "noop"
            }
            fn description(&self) -> &str {
                "does nothing"
            }
            fn schema(&self) -> crate::tool::ToolSchema {
                crate::tool::ToolSchema::new("noop", "does nothing")
            }
            async fn execute(
                &self,
                _args: std::collections::HashMap<String, crate::message::ToolValue>,
                _cancellation: Option<&CancellationToken>,
            ) -> Result<String, AgentError> {
                Ok(String::new())
            }
        }

        let llm = Arc::new(EchoLLM::new());
        let mut agent = ConversationalAgent::builder().llm(llm).build().unwrap();
        assert!(agent.add_tool(Arc::new(NoopTool)).is_err());
    }

    #[tokio::test]
    async fn reset_clears_back_to_system_prompt() {
        let llm = Arc::new(EchoLLM::new());
        let mut agent = ConversationalAgent::builder()
            .llm(llm)
            .system_prompt("be terse")
            .build()
            .unwrap();

        agent.run("hello", None).await.unwrap();
        agent.reset().unwrap();
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history()[0].content, "be terse");
    }
}
