//! HTTP client tool.
//!
//! Illustrative, not structurally interesting — issues a GET/POST request
//! to an allow-listed set of hosts and returns the response body, truncated
//! to a configured size.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::ToolValue;
use crate::providers::common::{race_cancellation, shared_http_client};
use crate::tool::{ParamType, Tool, ToolParameter, ToolSchema};

const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub enum HttpClientError {
    DomainNotAllowed(String),
    InvalidUrl(String),
    Request(String),
    Cancelled,
}

impl fmt::Display for HttpClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpClientError::DomainNotAllowed(host) => write!(f, "domain not allowed: {}", host),
            HttpClientError::InvalidUrl(url) => write!(f, "invalid url: {}", url),
            HttpClientError::Request(msg) => write!(f, "request failed: {}", msg),
            HttpClientError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for HttpClientError {}

pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// REST client restricted to an explicit host allowlist.
pub struct HttpClient {
    allowed_hosts: Vec<String>,
    max_response_bytes: usize,
}

impl HttpClient {
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self {
            allowed_hosts,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    fn check_allowed(&self, url: &reqwest::Url) -> Result<(), HttpClientError> {
        let host = url
            .host_str()
            .ok_or_else(|| HttpClientError::InvalidUrl(url.to_string()))?;
        if self.allowed_hosts.iter().any(|h| h == host) {
            Ok(())
        } else {
            Err(HttpClientError::DomainNotAllowed(host.to_string()))
        }
    }

    pub async fn get(
        &self,
        url: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<HttpResponse, HttpClientError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| HttpClientError::InvalidUrl(url.to_string()))?;
        self.check_allowed(&parsed)?;
        let send_fut = shared_http_client().get(parsed).send();
        let resp = race_cancellation(cancellation, send_fut)
            .await
            .ok_or(HttpClientError::Cancelled)?
            .map_err(|e| HttpClientError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| HttpClientError::Request(e.to_string()))?;
        let truncated = body.chars().take(self.max_response_bytes).collect();
        Ok(HttpResponse {
            status,
            body: truncated,
        })
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: serde_json::Value,
        cancellation: Option<&CancellationToken>,
    ) -> Result<HttpResponse, HttpClientError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| HttpClientError::InvalidUrl(url.to_string()))?;
        self.check_allowed(&parsed)?;
        let send_fut = shared_http_client().post(parsed).json(&payload).send();
        let resp = race_cancellation(cancellation, send_fut)
            .await
            .ok_or(HttpClientError::Cancelled)?
            .map_err(|e| HttpClientError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| HttpClientError::Request(e.to_string()))?;
        let truncated = body.chars().take(self.max_response_bytes).collect();
        Ok(HttpResponse {
            status,
            body: truncated,
        })
    }
}

#[async_trait]
impl Tool for HttpClient {
    fn name(&self) -> &str {
        "http_client"
    }

    fn description(&self) -> &str {
        "issues a GET or POST request to an allow-listed host and returns the response body"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description())
            .with_parameter(ToolParameter::new("method", ParamType::String, "GET or POST").required())
            .with_parameter(ToolParameter::new("url", ParamType::String, "full request URL").required())
            .with_parameter(ToolParameter::new("body", ParamType::String, "JSON body for POST"))
    }

    async fn execute(
        &self,
        args: HashMap<String, ToolValue>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError> {
        let method = args
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ValidationError("missing `method`".to_string()))?;
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ValidationError("missing `url`".to_string()))?;

        let response = match method.to_ascii_uppercase().as_str() {
            "GET" => self.get(url, cancellation).await,
            "POST" => {
                let body = args
                    .get("body")
                    .and_then(|v| v.as_str())
                    .map(|s| serde_json::from_str(s).unwrap_or(serde_json::Value::String(s.to_string())))
                    .unwrap_or(serde_json::Value::Null);
                self.post_json(url, body, cancellation).await
            }
            other => {
                return Err(AgentError::InvalidArgument(format!(
                    "unsupported HTTP method `{}`",
                    other
                )))
            }
        }
        .map_err(|e| match e {
            HttpClientError::DomainNotAllowed(_) => AgentError::PermissionDenied(e.to_string()),
            HttpClientError::InvalidUrl(_) => AgentError::InvalidArgument(e.to_string()),
            HttpClientError::Cancelled => AgentError::Cancelled,
            HttpClientError::Request(_) => AgentError::ProviderError {
                status: None,
                message: e.to_string(),
            },
        })?;

        Ok(format!("{} {}", response.status, response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disallowed_domain_is_rejected_before_any_request() {
        let client = HttpClient::new(vec!["api.example.com".to_string()]);
        let err = client.get("https://evil.example.net/data", None).await.unwrap_err();
        assert!(matches!(err, HttpClientError::DomainNotAllowed(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let client = HttpClient::new(vec!["api.example.com".to_string()]);
        let err = client.get("not a url", None).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidUrl(_)));
    }
}
