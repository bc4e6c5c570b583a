//! Local back end (Ollama-shaped). No authentication.
//!
//! POSTs to `/api/chat`. Response is a single JSON object when
//! `stream:false`, or a sequence of newline-delimited JSON objects when
//! streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::{Message, Response, ResponseMetadata, Role, StreamChunk};
use crate::provider::{LLM, STREAM_CHANNEL_CAPACITY};
use crate::providers::common::{race_cancellation, shared_http_client, transport_error};

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct OllamaProviderBuilder {
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    timeout: Duration,
}

impl Default for OllamaProviderBuilder {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            top_k: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl OllamaProviderBuilder {
    pub fn new() -> Self {
        Self::default()
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

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Local back end: no credential to check, so `build` never fails —
    /// kept as `Result` for API symmetry with the other builders.
    pub fn build(self) -> Result<OllamaProvider, AgentError> {
        Ok(OllamaProvider {
            endpoint: self.endpoint,
            model: self.model,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            timeout: self.timeout,
        })
    }
}

pub struct OllamaProvider {
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    timeout: Duration,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Serialize, Default)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "top_p")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "top_k")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: Options,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

fn role_to_wire(role: Role) -> String {
    match role {
        Role::System => "system".to_string(),
        Role::User | Role::Tool => "user".to_string(),
        Role::Assistant => "assistant".to_string(),
    }
}

impl OllamaProvider {
    fn build_request(&self, messages: &[Message], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: role_to_wire(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: Options {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
            },
        }
    }
}

#[async_trait]
impl LLM for OllamaProvider {
    async fn chat(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        let request = self.build_request(messages, false);
        let send_fut = shared_http_client()
            .post(format!("{}/api/chat", self.endpoint))
            .timeout(self.timeout)
            .json(&request)
            .send();
        let resp = race_cancellation(cancellation, send_fut)
            .await
            .ok_or(AgentError::Cancelled)?
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::ProviderError {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| AgentError::ParseError(e.to_string()))?;
        Ok(Response {
            content: parsed.message.content,
            tool_calls: Vec::new(),
            metadata: ResponseMetadata {
                model: Some(self.model.clone()),
                stop_reason: if parsed.done { Some("stop".to_string()) } else { None },
                input_tokens: parsed.prompt_eval_count,
                output_tokens: parsed.eval_count,
                extra: Default::default(),
            },
        })
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
            .post(format!("{}/api/chat", self.endpoint))
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
                    None => return,
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Ollama streaming is newline-delimited JSON, one object per line.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChatResponse>(&line) {
                        Ok(parsed) => {
                            accumulated.push_str(&parsed.message.content);
                            if !parsed.message.content.is_empty()
                                && tx
                                    .send(StreamChunk::delta(parsed.message.content.clone(), accumulated.clone()))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                            if parsed.done {
                                let metadata = ResponseMetadata {
                                    model: Some(model.clone()),
                                    stop_reason: Some("stop".to_string()),
                                    input_tokens: parsed.prompt_eval_count,
                                    output_tokens: parsed.eval_count,
                                    extra: Default::default(),
                                };
                                let _ = tx
                                    .send(StreamChunk::final_chunk(accumulated.clone(), "stop", metadata))
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
