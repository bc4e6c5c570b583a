//! Role-renamed back end (Gemini-shaped).
//!
//! Request has `contents[]` with role `"model"` for assistant turns and an
//! optional top-level `system_instruction`. Response carries
//! `candidates[0].content.parts[].text`; a blocked response
//! (`promptFeedback.blockReason` present, or no candidates) is surfaced as
//! an error, never as empty content. Authentication is a query-string key.

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

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct GeminiProviderBuilder {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for GeminiProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl GeminiProviderBuilder {
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

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
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

    pub fn build(self) -> Result<GeminiProvider, AgentError> {
        let api_key = self
            .api_key
            .ok_or_else(|| AgentError::InvalidArgument("Gemini provider requires an api_key".to_string()))?;
        Ok(GeminiProvider {
            api_key,
            endpoint: self.endpoint,
            model: self.model,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
            retry: self.retry,
        })
    }
}

pub struct GeminiProvider {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

fn split_system_and_contents(messages: &[Message]) -> (Option<SystemInstruction>, Vec<Content>) {
    let mut system = None;
    let mut contents = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::System {
            system = Some(SystemInstruction {
                parts: vec![Part { text: m.content.clone() }],
            });
            continue;
        }
        contents.push(Content {
            role: role_to_wire(m.role).to_string(),
            parts: vec![Part { text: m.content.clone() }],
        });
    }
    (system, contents)
}

impl GeminiProvider {
    fn build_request(&self, messages: &[Message]) -> GenerateContentRequest {
        let (system_instruction, contents) = split_system_and_contents(messages);
        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                max_output_tokens: self.max_tokens,
            },
        }
    }

    fn extract_response(parsed: GenerateContentResponse, model: &str) -> Result<Response, AgentError> {
        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AgentError::ProviderError {
                status: None,
                message: format!("response blocked: {}", reason),
            });
        }
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ProviderError {
                status: None,
                message: "response blocked: no candidates returned".to_string(),
            })?;
        let content = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        Ok(Response {
            content,
            tool_calls: Vec::new(),
            metadata: ResponseMetadata {
                model: Some(model.to_string()),
                stop_reason: candidate.finish_reason,
                input_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.prompt_token_count),
                output_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.candidates_token_count),
                extra: Default::default(),
            },
        })
    }
}

#[async_trait]
impl LLM for GeminiProvider {
    async fn chat(
        &self,
        messages: &[Message],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, AgentError> {
        let request = self.build_request(messages);
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        self.retry
            .run(
                cancellation,
                || {
                    let request = &request;
                    let url = &url;
                    async move {
                        let resp = shared_http_client()
                            .post(url)
                            .query(&[("key", self.api_key.as_str())])
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

                        let parsed: GenerateContentResponse =
                            resp.json().await.map_err(|e| AgentError::ParseError(e.to_string()))?;
                        Self::extract_response(parsed, &self.model)
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
        let request = self.build_request(messages);
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.endpoint, self.model
        );
        let send_fut = shared_http_client()
            .post(&url)
            .query(&[("key", self.api_key.as_str()), ("alt", "sse")])
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

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let payload = line["data:".len()..].trim();
                    match serde_json::from_str::<GenerateContentResponse>(payload) {
                        Ok(parsed) => match GeminiProvider::extract_response(parsed, &model) {
                            Ok(response) => {
                                accumulated.push_str(&response.content);
                                let finished = response.metadata.stop_reason.clone();
                                if tx
                                    .send(StreamChunk::delta(response.content, accumulated.clone()))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                                if let Some(reason) = finished {
                                    let _ = tx
                                        .send(StreamChunk::final_chunk(accumulated.clone(), reason, response.metadata))
                                        .await;
                                    return;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(StreamChunk::error(e.to_string())).await;
                                return;
                            }
                        },
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
    fn assistant_role_renamed_to_model() {
        let messages = [Message::user("hi"), Message::assistant("hello")];
        let (_, contents) = split_system_and_contents(&messages);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
    }

    #[test]
    fn blocked_response_is_an_error_not_empty_content() {
        let parsed = GenerateContentResponse {
            candidates: Vec::new(),
            prompt_feedback: Some(PromptFeedback {
                block_reason: Some("SAFETY".to_string()),
            }),
            usage_metadata: None,
        };
        let err = GeminiProvider::extract_response(parsed, "gemini-2.0-flash").unwrap_err();
        assert!(matches!(err, AgentError::ProviderError { .. }));
    }

    #[test]
    fn no_candidates_without_block_reason_is_still_an_error() {
        let parsed = GenerateContentResponse {
            candidates: Vec::new(),
            prompt_feedback: None,
            usage_metadata: None,
        };
        assert!(GeminiProvider::extract_response(parsed, "gemini-2.0-flash").is_err());
    }
}
