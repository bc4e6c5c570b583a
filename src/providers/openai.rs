//! Native function-calling back end (OpenAI-shaped).
//!
//! POSTs JSON to `/chat/completions`. Messages carry `role` + `content` +
//! optional `tool_calls` / `tool_call_id`; tools are advertised as
//! `tools[]` of `{type:"function", function:{name, description, parameters}}`.
//! Streaming is SSE with `data: {json}` lines terminated by `data: [DONE]`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, Response, ResponseMetadata, Role, StreamChunk, ToolCall};
use crate::provider::{LLM, STREAM_CHANNEL_CAPACITY};
use crate::providers::common::{race_cancellation, shared_http_client, transport_error, RetryPolicy};
use crate::tool::ToolSchema;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Builder for [`OpenAIProvider`]. Required field: `api_key`. Optional
/// fields are applied in call order (later calls override earlier ones) and
/// default as documented on each setter.
pub struct OpenAIProviderBuilder {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for OpenAIProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl OpenAIProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<OpenAIProvider, AgentError> {
        let api_key = self
            .api_key
            .ok_or_else(|| AgentError::InvalidArgument("OpenAI provider requires an api_key".to_string()))?;
        Ok(OpenAIProvider {
            api_key,
            endpoint: self.endpoint,
            model: self.model,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
            retry: self.retry,
        })
    }
}

pub struct OpenAIProvider {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct StreamEnvelope {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

fn role_to_wire(role: Role) -> String {
    match role {
        Role::System => "system".to_string(),
        Role::User => "user".to_string(),
        Role::Assistant => "assistant".to_string(),
        Role::Tool => "tool".to_string(),
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: role_to_wire(m.role),
            content: m.content.clone(),
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: serde_json::to_string(
                                    &tc.arguments
                                        .iter()
                                        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                                        .collect::<std::collections::HashMap<_, _>>(),
                                )
                                .unwrap_or_default(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: m.tool_call_id.clone(),
        })
        .collect()
}

fn parse_tool_calls(wire: &[WireToolCall]) -> Vec<ToolCall> {
    wire.iter()
        .map(|tc| {
            let arguments = serde_json::from_str::<serde_json::Value>(&tc.function.arguments)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .map(|obj| {
                    obj.into_iter()
                        .map(|(k, v)| (k, crate::message::ToolValue::from(v)))
                        .collect()
                })
                .unwrap_or_default();
            ToolCall {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments,
            }
        })
        .collect()
}

impl OpenAIProvider {
    fn build_request(&self, messages: &[Message], schemas: &[ToolSchema], stream: bool) -> ChatRequest {
        let tools = if schemas.is_empty() {
            None
        } else {
            Some(
                schemas
                    .iter()
                    .map(|s| WireTool {
                        kind: "function".to_string(),
                        function: WireToolFunction {
                            name: s.name.clone(),
                            description: s.description.clone(),
                            parameters: s.to_json_schema(),
                        },
                    })
                    .collect(),
            )
        };
        ChatRequest {
            model: self.model.clone(),
            messages: to_wire_messages(messages),
            tools,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn do_chat(
        &self,
        messages: &[Message],
        schemas: &[ToolSchema],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        let request = self.build_request(messages, schemas, false);
        self.retry
            .run(
                cancellation,
                || {
                    let request = &request;
                    async move {
                        let resp = shared_http_client()
                            .post(format!("{}/chat/completions", self.endpoint))
                            .bearer_auth(&self.api_key)
                            .timeout(self.timeout)
                            .json(request)
                            .send()
                            .await
                            .map_err(transport_error)?;

                        let status = resp.status();
                        if !status.is_success() {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(AgentError::ProviderError {
                                status: Some(status.as_u16()),
                                message: body,
                            });
                        }

                        let parsed: ChatResponse = resp
                            .json()
                            .await
                            .map_err(|e| AgentError::ParseError(e.to_string()))?;

                        let choice = parsed
                            .choices
                            .into_iter()
                            .next()
                            .ok_or_else(|| AgentError::ParseError("no choices in response".to_string()))?;

                        Ok(Response {
                            content: choice.message.content.unwrap_or_default(),
                            tool_calls: parse_tool_calls(&choice.message.tool_calls),
                            metadata: ResponseMetadata {
                                model: Some(self.model.clone()),
                                stop_reason: choice.finish_reason,
                                input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
                                output_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
                                extra: Default::default(),
                            },
                        })
                    }
                },
            )
            .await
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        self.do_chat(messages, &[], cancellation).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        schemas: &[ToolSchema],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        self.do_chat(messages, schemas, cancellation).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<mpsc::Receiver<StreamChunk>, AgentError> {
        let request = self.build_request(messages, &[], true);
        let send_fut = shared_http_client()
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send();
        let resp = race_cancellation(cancellation, send_fut)
            .await
            .ok_or(AgentError::Cancelled)?
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::ProviderError {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let model = self.model.clone();
        let cancellation = cancellation.cloned();
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut accumulated = String::new();

            loop {
                if cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
                    let _ = tx.send(StreamChunk::error("cancelled")).await;
                    return;
                }
                let chunk = match byte_stream.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(StreamChunk::error(e.to_string())).await;
                        return;
                    }
                    None => break, // EOF
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let payload = line["data:".len()..].trim();
                    if payload == "[DONE]" {
                        return; // terminal sentinel; channel drops tx, closing it
                    }
                    match serde_json::from_str::<StreamEnvelope>(payload) {
                        Ok(envelope) => {
                            let Some(choice) = envelope.choices.into_iter().next() else {
                                continue;
                            };
                            if let Some(delta) = choice.delta.content {
                                accumulated.push_str(&delta);
                                if tx.send(StreamChunk::delta(delta, accumulated.clone())).await.is_err() {
                                    return; // consumer dropped the receiver
                                }
                            }
                            if let Some(reason) = choice.finish_reason {
                                let metadata = ResponseMetadata {
                                    model: Some(model.clone()),
                                    stop_reason: Some(reason.clone()),
                                    input_tokens: None,
                                    output_tokens: None,
                                    extra: Default::default(),
                                };
                                let _ = tx
                                    .send(StreamChunk::final_chunk(accumulated.clone(), reason, metadata))
                                    .await;
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(StreamChunk::error(format!("stream decode error: {}", e))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_api_key() {
        let err = OpenAIProviderBuilder::new().build().unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[test]
    fn builder_defaults_model_and_endpoint() {
        let provider = OpenAIProviderBuilder::new().api_key("sk-test").build().unwrap();
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.endpoint, DEFAULT_ENDPOINT);
        assert!(provider.temperature.is_none());
    }

    #[test]
    fn later_options_override_earlier_ones() {
        let provider = OpenAIProviderBuilder::new()
            .model("gpt-4.1")
            .model("gpt-4.1-nano")
            .api_key("sk-test")
            .build()
            .unwrap();
        assert_eq!(provider.model, "gpt-4.1-nano");
    }

    #[test]
    fn tool_schemas_translate_to_json_schema_functions() {
        let provider = OpenAIProviderBuilder::new().api_key("sk-test").build().unwrap();
        let schema = ToolSchema::new("add", "adds two numbers");
        let request =
            provider.build_request(&[Message::user("hi")], std::slice::from_ref(&schema), false);
        let tools = request.tools.unwrap();
        assert_eq!(tools[0].function.name, "add");
    }
}
