//! End-to-end: a function-calling agent backed by a scripted provider
//! dispatching the real sandboxed filesystem tool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agentflow::agent::{Agent, FunctionCallingAgent};
use agentflow::error::AgentError;
use agentflow::message::{Message, Response, ResponseMetadata, ToolCall, ToolValue};
use agentflow::provider::LLM;
use agentflow::tool::ToolSchema;
use agentflow::tools::FileSystemTool;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct ScriptedLLM {
    replies: Mutex<std::collections::VecDeque<Response>>,
}

impl ScriptedLLM {
    fn new(replies: Vec<Response>) -> Self {
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
        unreachable!("function-calling agent uses chat_with_tools")
    }

    async fn chat_with_tools(
        &self,
        _messages: &[Message],
        _schemas: &[ToolSchema],
        _cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::ProviderError {
                status: None,
                message: "no more scripted replies".to_string(),
            })
    }
}

fn write_call(id: &str, path: &str, content: &str) -> ToolCall {
    let mut arguments = HashMap::new();
    arguments.insert("operation".to_string(), ToolValue::String("write".to_string()));
    arguments.insert("path".to_string(), ToolValue::String(path.to_string()));
    arguments.insert("content".to_string(), ToolValue::String(content.to_string()));
    ToolCall {
        id: id.to_string(),
        name: "filesystem".to_string(),
        arguments,
    }
}

#[tokio::test]
async fn agent_writes_a_file_through_the_sandboxed_tool() {
    let _ = env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let fs_tool = FileSystemTool::new(dir.path(), true).unwrap();

    let llm = Arc::new(ScriptedLLM::new(vec![
        Response {
            content: String::new(),
            tool_calls: vec![write_call("call-1", "notes.txt", "hello from the agent")],
            metadata: ResponseMetadata::default(),
        },
        Response {
            content: "done".to_string(),
            tool_calls: vec![],
            metadata: ResponseMetadata::default(),
        },
    ]));

    let mut agent = FunctionCallingAgent::builder()
        .llm(llm)
        .with_tool(Arc::new(fs_tool))
        .unwrap()
        .build()
        .unwrap();

    let response = agent.run("write notes.txt", None).await.unwrap();
    assert_eq!(response.content, "done");

    let written = tokio::fs::read_to_string(dir.path().join("notes.txt")).await.unwrap();
    assert_eq!(written, "hello from the agent");
}

#[tokio::test]
async fn agent_surfaces_sandbox_rejection_as_a_tool_observation_not_a_panic() {
    let dir = TempDir::new().unwrap();
    let fs_tool = FileSystemTool::new(dir.path(), true).unwrap();

    let llm = Arc::new(ScriptedLLM::new(vec![
        Response {
            content: String::new(),
            tool_calls: vec![write_call("call-1", "../../../etc/passwd", "pwned")],
            metadata: ResponseMetadata::default(),
        },
        Response {
            content: "acknowledged".to_string(),
            tool_calls: vec![],
            metadata: ResponseMetadata::default(),
        },
    ]));

    let mut agent = FunctionCallingAgent::builder()
        .llm(llm)
        .with_tool(Arc::new(fs_tool))
        .unwrap()
        .build()
        .unwrap();

    let response = agent.run("escape the sandbox", None).await.unwrap();
    assert_eq!(response.content, "acknowledged");

    let tool_message = &agent.history()[2];
    assert!(tool_message.content.contains("invalid-argument") || tool_message.content.contains("escapes sandbox"));
}
