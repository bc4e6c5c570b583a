//! ReAct agent loop (spec §4.D.2): `Thought` / `Action` / `Action Input` /
//! `Observation`, alternating until a `Final Answer` marker appears.
//!
//! Intended pairing: any provider, including those without native
//! function-calling ([`crate::providers::ClaudeProvider`],
//! [`crate::providers::OllamaProvider`]). The tool catalog is embedded in
//! the system prompt as text rather than advertised through
//! [`crate::provider::LLM::chat_with_tools`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ConversationHistory, DEFAULT_MAX_ITERATIONS};
use crate::error::AgentError;
use crate::message::{Message, Response, ToolValue};
use crate::provider::LLM;
use crate::tool::{Tool, ToolRegistry};

lazy_static! {
    static ref FINAL_ANSWER_RE: Regex = Regex::new(r"(?m)^Final Answer:\s*(.*)$").unwrap();
    static ref THOUGHT_RE: Regex = Regex::new(r"(?m)^Thought:\s*(.*)$").unwrap();
    static ref ACTION_RE: Regex = Regex::new(r"(?m)^Action:\s*(.*)$").unwrap();
    static ref ACTION_INPUT_RE: Regex = Regex::new(r"(?m)^Action Input:\s*(.*)$").unwrap();
}

/// One recorded iteration of the ReAct loop, retained alongside the history
/// for inspection via [`ReactAgent::trace`].
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub iteration: usize,
    pub thought: Option<String>,
    pub action: Option<String>,
    pub action_input: Option<JsonValue>,
    pub observation: String,
}

enum ParsedReply {
    /// `Final Answer` wins when both it and `Action` appear in one reply
    /// (spec §9 Open Question 2: the source prefers `Final Answer`).
    Final(String),
    Action {
        thought: Option<String>,
        action: String,
        input_raw: String,
    },
}

fn parse_reply(reply: &str) -> ParsedReply {
    if let Some(caps) = FINAL_ANSWER_RE.captures(reply) {
        return ParsedReply::Final(caps[1].trim().to_string());
    }
    let thought = THOUGHT_RE.captures(reply).map(|c| c[1].trim().to_string());
    let action = ACTION_RE.captures(reply).map(|c| c[1].trim().to_string());
    let input_raw = ACTION_INPUT_RE.captures(reply).map(|c| c[1].trim().to_string());

    match (action, input_raw) {
        (Some(action), Some(input_raw)) => ParsedReply::Action {
            thought,
            action,
            input_raw,
        },
        // Neither marker present: lenient termination, treat the whole
        // reply as the final answer.
        _ => ParsedReply::Final(reply.trim().to_string()),
    }
}

/// Parse a JSON object string into a dispatch-ready argument map.
fn parse_action_input(raw: &str) -> Result<HashMap<String, ToolValue>, AgentError> {
    let value: JsonValue = serde_json::from_str(raw)
        .map_err(|e| AgentError::ValidationError(format!("Action Input is not valid JSON: {}", e)))?;
    match value {
        JsonValue::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, ToolValue::from(v)))
            .collect()),
        other => Err(AgentError::ValidationError(format!(
            "Action Input must be a JSON object, got: {}",
            other
        ))),
    }
}

fn render_tool_catalog(registry: &ToolRegistry) -> String {
    if registry.is_empty() {
        return String::new();
    }
    let mut catalog = String::from("You have access to the following tools:\n");
    for schema in registry.schemas() {
        catalog.push_str(&format!("- {}: {}\n", schema.name, schema.description));
        for param in &schema.parameters {
            catalog.push_str(&format!(
                "    - {} ({:?}{}): {}\n",
                param.name,
                param.param_type,
                if param.required { ", required" } else { "" },
                param.description
            ));
        }
    }
    catalog
}

const REACT_GRAMMAR: &str = "\nRespond using exactly this format:\n\
Thought: <reasoning>\n\
Action: <tool-name>\n\
Action Input: <JSON object of arguments>\n\
Observation: <filled in by runtime>\n\
...\n\
Final Answer: <text>\n";

fn render_system_prompt(base: Option<&str>, registry: &ToolRegistry) -> String {
    let mut prompt = base.unwrap_or_default().to_string();
    let catalog = render_tool_catalog(registry);
    if !catalog.is_empty() {
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(&catalog);
    }
    prompt.push_str(REACT_GRAMMAR);
    prompt
}

/// Builder for [`ReactAgent`]. Required field: `llm`.
pub struct ReactAgentBuilder {
    llm: Option<Arc<dyn LLM>>,
    system_prompt: Option<String>,
    max_iterations: usize,
    registry: ToolRegistry,
}

impl Default for ReactAgentBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            registry: ToolRegistry::new(),
        }
    }
}

impl ReactAgentBuilder {
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

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, AgentError> {
        self.registry.add_tool(tool)?;
        Ok(self)
    }

    pub fn build(self) -> Result<ReactAgent, AgentError> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::InvalidArgument("ReAct agent requires an llm".to_string()))?;
        let rendered_prompt = render_system_prompt(self.system_prompt.as_deref(), &self.registry);
        Ok(ReactAgent {
            llm,
            registry: self.registry,
            history: ConversationHistory::new(Some(rendered_prompt)),
            max_iterations: self.max_iterations,
            trace: Vec::new(),
        })
    }
}

pub struct ReactAgent {
    llm: Arc<dyn LLM>,
    registry: ToolRegistry,
    history: ConversationHistory,
    max_iterations: usize,
    trace: Vec<TraceStep>,
}

impl ReactAgent {
    pub fn builder() -> ReactAgentBuilder {
        ReactAgentBuilder::new()
    }

    /// The recorded trace of thought/action/observation steps, in order.
    pub fn trace(&self) -> &[TraceStep] {
        &self.trace
    }
}

#[async_trait]
impl Agent for ReactAgent {
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
            log::debug!("agentflow: ReAct agent iteration {} of {}", iteration + 1, self.max_iterations);
            let response = self.llm.chat(self.history.as_slice(), cancellation).await?;
            let reply = response.content.clone();

            match parse_reply(&reply) {
                ParsedReply::Final(answer) => {
                    self.history.push(Message::assistant(reply));
                    return Ok(Response {
                        content: answer,
                        tool_calls: Vec::new(),
                        metadata: response.metadata,
                    });
                }
                ParsedReply::Action {
                    thought,
                    action,
                    input_raw,
                } => {
                    let (action_input, observation) = match parse_action_input(&input_raw) {
                        Ok(args) => {
                            let input_json = JsonValue::Object(
                                args.iter()
                                    .map(|(k, v)| (k.clone(), JsonValue::from(v.clone())))
                                    .collect(),
                            );
                            let outcome = self.registry.dispatch(&action, args, cancellation).await;
                            let observation = match outcome {
                                Ok(result) => result,
                                Err(err) => err.to_string(),
                            };
                            (Some(input_json), observation)
                        }
                        Err(err) => (None, err.to_string()),
                    };

                    self.history.push(Message::assistant(format!(
                        "Thought: {}\nAction: {}\nAction Input: {}\nObservation: {}",
                        thought.clone().unwrap_or_default(),
                        action,
                        input_raw,
                        observation
                    )));
                    self.trace.push(TraceStep {
                        iteration,
                        thought,
                        action: Some(action),
                        action_input,
                        observation,
                    });
                }
            }
        }

        log::warn!(
            "agentflow: ReAct agent exhausted {} iterations without a Final Answer",
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
        self.trace.clear();
        Ok(())
    }

    fn history(&self) -> &[Message] {
        self.history.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResponseMetadata;
    use crate::tool::{ParamType, ToolParameter, ToolSchema};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedLLM {
        replies: Mutex<VecDeque<&'static str>>,
    }

    impl ScriptedLLM {
        fn new(replies: Vec<&'static str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl LLM for ScriptedLLM {
        async fn chat(
            &self,
            _messages: &[Message],
            _cancellation: Option<&CancellationToken>,
        ) -> Result<Response, AgentError> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::ProviderError {
                    status: None,
                    message: "no more scripted replies".to_string(),
                })?;
            Ok(Response {
                content: reply.to_string(),
                tool_calls: Vec::new(),
                metadata: ResponseMetadata::default(),
            })
        }
    }

    struct Arith;

    #[async_trait]
    impl Tool for Arith {
        fn name(&self) -> &str {
            "arith"
        }
        fn description(&self) -> &str {
            "unused in tests; real tools are `mul`/`add`"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("arith", "unused")
        }
        async fn execute(
            &self,
            _args: HashMap<String, ToolValue>,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    struct Mul;
    #[async_trait]
    impl Tool for Mul {
        fn name(&self) -> &str {
            "mul"
        }
        fn description(&self) -> &str {
            "multiplies a and b"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("mul", "multiplies a and b")
                .with_parameter(ToolParameter::new("a", ParamType::Number, "left").required())
                .with_parameter(ToolParameter::new("b", ParamType::Number, "right").required())
        }
        async fn execute(
            &self,
            args: HashMap<String, ToolValue>,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<String, AgentError> {
            let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or_default();
            let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or_default();
            Ok(format!("{}", a * b))
        }
    }

    struct AddTool;
    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "adds a and b"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("add", "adds a and b")
                .with_parameter(ToolParameter::new("a", ParamType::Number, "left").required())
                .with_parameter(ToolParameter::new("b", ParamType::Number, "right").required())
        }
        async fn execute(
            &self,
            args: HashMap<String, ToolValue>,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<String, AgentError> {
            let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or_default();
            let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or_default();
            Ok(format!("{}", a + b))
        }
    }

    // spec §8 S2: two-step ReAct trace culminating in a Final Answer.
    #[tokio::test]
    async fn s2_react_two_step() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: multiply first\nAction: mul\nAction Input: {\"a\":25,\"b\":4}",
            "Thought: now add\nAction: add\nAction Input: {\"a\":100,\"b\":100}",
            "Thought: done\nFinal Answer: 200",
        ]));
        let mut agent = ReactAgent::builder()
            .llm(llm)
            .with_tool(Arc::new(Mul))
            .unwrap()
            .with_tool(Arc::new(AddTool))
            .unwrap()
            .build()
            .unwrap();

        let response = agent.run("Compute 25*4+100", None).await.unwrap();
        assert_eq!(response.content, "200");
        assert_eq!(agent.trace().len(), 3);
        assert_eq!(agent.trace()[0].observation, "100");
        assert_eq!(agent.trace()[1].observation, "200");
    }

    #[tokio::test]
    async fn final_answer_wins_when_action_also_present() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: could call a tool but I already know\nAction: mul\nAction Input: {}\nFinal Answer: 42",
        ]));
        let mut agent = ReactAgent::builder()
            .llm(llm)
            .with_tool(Arc::new(Mul))
            .unwrap()
            .build()
            .unwrap();

        let response = agent.run("what is the answer?", None).await.unwrap();
        assert_eq!(response.content, "42");
        assert!(agent.trace().is_empty());
    }

    #[tokio::test]
    async fn lenient_termination_when_no_markers_present() {
        let llm = Arc::new(ScriptedLLM::new(vec!["just a plain answer, no markers"]));
        let mut agent = ReactAgent::builder().llm(llm).build().unwrap();

        let response = agent.run("hi", None).await.unwrap();
        assert_eq!(response.content, "just a plain answer, no markers");
    }

    #[tokio::test]
    async fn malformed_json_action_input_feeds_back_as_observation() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: try\nAction: mul\nAction Input: not-json",
            "Final Answer: gave up",
        ]));
        let mut agent = ReactAgent::builder()
            .llm(llm)
            .with_tool(Arc::new(Mul))
            .unwrap()
            .build()
            .unwrap();

        let response = agent.run("go", None).await.unwrap();
        assert_eq!(response.content, "gave up");
        assert_eq!(agent.trace().len(), 1);
        assert!(agent.trace()[0].observation.contains("validation-error"));
    }

    #[tokio::test]
    async fn iteration_cap_exceeded_without_final_answer() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            "Thought: still working\nAction: mul\nAction Input: {\"a\":1,\"b\":1}",
            "Thought: still working\nAction: mul\nAction Input: {\"a\":1,\"b\":1}",
        ]));
        let mut agent = ReactAgent::builder()
            .llm(llm)
            .max_iterations(2)
            .with_tool(Arc::new(Mul))
            .unwrap()
            .build()
            .unwrap();

        let err = agent.run("never finish", None).await.unwrap_err();
        assert!(matches!(err, AgentError::IterationLimitExceeded { max_iterations: 2 }));
    }

    #[test]
    fn tool_catalog_rendered_into_system_prompt() {
        let mut registry = ToolRegistry::new();
        registry.add_tool(Arc::new(Arith)).unwrap();
        let prompt = render_system_prompt(Some("be helpful"), &registry);
        assert!(prompt.contains("be helpful"));
        assert!(prompt.contains("arith"));
        assert!(prompt.contains("Final Answer:"));
    }
}
