//! System-prompt-separated back end (Claude-shaped).
//!
//! The request carries a top-level `system` string distinct from
//! `messages[]`; any system [`Message`] in the input sequence is extracted
//! into that field before the remaining messages (in order) are sent.
//! Response is `{content:[{type:"text", text}], stop_reason,
//! usage:{input_tokens, output_tokens}}`. Streaming uses named SSE events:
//! `message_start`, `content_block_delta` (`delta.text`), `message_stop`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, Response, ResponseMetadata, Role, StreamChunk};
use crate::provider::{LLM, STREAM_CHANNEL_CAPACITY};
use crate::providers::common::{race_cancellation, shared_http_client, transport_error, RetryPolicy};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-0";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProviderBuilder {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for ClaudeProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: Some(4096),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClaudeProviderBuilder {
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

    pub fn build(self) -> Result<ClaudeProvider, AgentError> {
        let api_key = self
            .api_key
            .ok_or_else(|| AgentError::InvalidArgument("Claude provider requires an api_key".to_string()))?;
        Ok(ClaudeProvider {
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

pub struct ClaudeProvider {
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
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: UsageBlock,
}

#[derive(Deserialize)]
struct UsageBlock {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaField },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDeltaField },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct DeltaField {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct MessageDeltaField {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Extract a system message (assistant/user messages keep their order)
/// and translate the role-tagged remainder to Claude's wire shape.
fn split_system_and_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system = None;
    let mut wire = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::System => {
                system = Some(m.content.clone());
            }
            Role::User | Role::Tool => wire.push(WireMessage {
                role: "user".to_string(),
                content: m.content.clone(),
            }),
            Role::Assistant => wire.push(WireMessage {
                role: "assistant".to_string(),
                content: m.content.clone(),
            }),
        }
    }
    (system, wire)
}

impl ClaudeProvider {
    fn build_request(&self, messages: &[Message], stream: bool) -> MessagesRequest {
        let (system, wire_messages) = split_system_and_messages(messages);
        MessagesRequest {
            model: self.model.clone(),
            system,
            messages: wire_messages,
            max_tokens: self.max_tokens.unwrap_or(4096),
            temperature: self.temperature,
            top_p: self.top_p,
            stream,
        }
    }
}

#[async_trait]
impl LLM for ClaudeProvider {
    async fn chat(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        let request = self.build_request(messages, false);
        self.retry
            .run(
                cancellation,
                || {
                    let request = &request;
                    async move {
                        let resp = shared_http_client()
                            .post(format!("{}/messages", self.endpoint))
                            .header("x-api-key", &self.api_key)
                            .header("anthropic-version", ANTHROPIC_VERSION)
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

                        let parsed: MessagesResponse =
                            resp.json().await.map_err(|e| AgentError::ParseError(e.to_string()))?;

                        let content = parsed
                            .content
                            .iter()
                            .filter(|b| b.kind == "text")
                            .map(|b| b.text.as_str())
                            .collect::<Vec<_>>()
                            .join("");

                        Ok(Response {
                            content,
                            tool_calls: Vec::new(),
                            metadata: ResponseMetadata {
                                model: Some(self.model.clone()),
                                stop_reason: parsed.stop_reason,
                                input_tokens: Some(parsed.usage.input_tokens),
                                output_tokens: Some(parsed.usage.output_tokens),
                                extra: Default::default(),
                            },
                        })
                    }
                },
            )
            .await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<mpsc::Receiver<StreamChunk>, AgentError> {
        let request = self.build_request(messages, true);
        let send_fut = shared_http_client()
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                    None => return, // EOF closes the channel via tx drop
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let payload = line["data:".len()..].trim();
                    match serde_json::from_str::<StreamEvent>(payload) {
                        Ok(StreamEvent::ContentBlockDelta { delta }) => {
                            accumulated.push_str(&delta.text);
                            if tx
                                .send(StreamChunk::delta(delta.text, accumulated.clone()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Ok(StreamEvent::MessageDelta { delta }) => {
                            if let Some(reason) = delta.stop_reason {
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
                            }
                        }
                        Ok(StreamEvent::MessageStop) => return,
                        Ok(StreamEvent::Other) => {}
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
    fn system_message_extracted_to_top_level_field() {
        let messages = [Message::system("be terse"), Message::user("hi")];
        let (system, wire) = split_system_and_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn builder_requires_api_key() {
        assert!(ClaudeProviderBuilder::new().build().is_err());
    }
}
