//! Function-calling agent loop (spec §4.D.1).
//!
//! Intended pairing: providers with native tool-call support
//! ([`crate::providers::OpenAIProvider`]). Gemini's safety-filtering
//! response contract makes it a poor fit for this loop; see
//! [`crate::providers::GeminiProvider`] and the ReAct agent instead.
//! Each iteration sends the full history plus the registry's schemas;
//! dispatches any returned tool calls sequentially, in the order the
//! provider returned them; and terminates on the first response carrying no
//! tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ConversationHistory, DEFAULT_MAX_ITERATIONS};
use crate::error::AgentError;
use crate::message::{Message, Response};
use crate::provider::LLM;
use crate::tool::{Tool, ToolRegistry};

/// Builder for [`FunctionCallingAgent`]. Required field: `llm`.
pub struct FunctionCallingAgentBuilder {
    llm: Option<Arc<dyn LLM>>,
    system_prompt: Option<String>,
    max_iterations: usize,
    registry: ToolRegistry,
}

impl Default for FunctionCallingAgentBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            registry: ToolRegistry::new(),
        }
    }
}

impl FunctionCallingAgentBuilder {
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

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Register a tool at construction time. Errors the same way
    /// [`ToolRegistry::add_tool`] does (duplicate or empty name).
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, AgentError> {
        self.registry.add_tool(tool)?;
        Ok(self)
    }

    pub fn build(self) -> Result<FunctionCallingAgent, AgentError> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::InvalidArgument("function-calling agent requires an llm".to_string()))?;
        Ok(FunctionCallingAgent {
            llm,
            registry: self.registry,
            history: ConversationHistory::new(self.system_prompt),
            max_iterations: self.max_iterations,
        })
    }
}

pub struct FunctionCallingAgent {
    llm: Arc<dyn LLM>,
    registry: ToolRegistry,
    history: ConversationHistory,
    max_iterations: usize,
}

impl FunctionCallingAgent {
    pub fn builder() -> FunctionCallingAgentBuilder {
        FunctionCallingAgentBuilder::new()
    }
}

#[async_trait]
impl Agent for FunctionCallingAgent {
    async fn run(
        &mut self,
        input: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        self.history.push(Message::user(input));

        for iteration in 0..self.max_iterations {
            if cancellation.is_some_and(|t| t.is_cancelled()) {
                return Err(AgentError::Cancelled);
            }
            log::debug!(
                "agentflow: function-calling agent iteration {} of {}",
                iteration + 1,
                self.max_iterations
            );
            let response = self
                .llm
                .chat_with_tools(self.history.as_slice(), self.registry.schemas(), cancellation)
                .await?;

            if response.is_terminal() {
                self.history.push(Message::assistant(response.content.clone()));
                return Ok(response);
            }

            self.history.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if cancellation.is_some_and(|t| t.is_cancelled()) {
                    return Err(AgentError::Cancelled);
                }
                let outcome = self
                    .registry
                    .dispatch(&call.name, call.arguments.clone(), cancellation)
                    .await;
                let content = match outcome {
                    Ok(result) => result,
                    Err(err) => err.to_string(),
                };
                self.history.push(Message::tool_result(call.id.clone(), content));
            }
        }

        log::warn!(
            "agentflow: function-calling agent exhausted {} iterations without a terminal response",
            self.max_iterations
        );
        Err(AgentError::IterationLimitExceeded {
            max_iterations: self.max_iterations,
        })
    }

    fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        self.registry.add_tool(tool)
    }

    fn reset(&mut self) -> Result<(), AgentError> {
        self.history.reset();
        Ok(())
    }

    fn history(&self) -> &[Message] {
        self.history.as_slice()
    }
}
