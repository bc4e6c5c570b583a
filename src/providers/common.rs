//! Shared plumbing used by every provider: a pooled [`reqwest::Client`], an
//! exponential-backoff retry helper, and cancellation wiring shared by both
//! the retry loop and raw one-shot requests.

use std::future::Future;
use std::time::Duration;

use lazy_static::lazy_static;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

lazy_static! {
    /// Process-wide pooled HTTP client, shared (cloned cheaply) by every
    /// provider instance so TLS sessions and DNS lookups stay warm across
    /// requests.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the lazily initialized shared [`reqwest::Client`].
pub fn shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Retry policy: exponential backoff with jitter, capped attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (0-indexed retry count), jittered by
    /// up to 20% to avoid synchronized retries across callers.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64 * 2u64.pow(attempt);
        let jitter_fraction = rand::thread_rng().gen_range(0.9..1.1);
        Duration::from_millis((base as f64 * jitter_fraction) as u64)
    }

    /// Run `op` until it succeeds, a non-retryable error is returned, or
    /// `max_attempts` is exhausted. `cancellation`, if given, aborts both an
    /// in-flight attempt and an in-progress backoff sleep as soon as it
    /// fires, returning [`AgentError::Cancelled`].
    pub async fn run<F, Fut, T>(
        &self,
        cancellation: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0;
        loop {
            if let Some(token) = cancellation {
                if token.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
            }
            let result = match cancellation {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(AgentError::Cancelled),
                        r = op() => r,
                    }
                }
                None => op().await,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    log::warn!(
                        "agentflow: transient provider error on attempt {}/{}: {}",
                        attempt + 1,
                        self.max_attempts,
                        err
                    );
                    match cancellation {
                        Some(token) => {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => return Err(AgentError::Cancelled),
                                _ = tokio::time::sleep(self.delay_for(attempt)) => {}
                            }
                        }
                        None => tokio::time::sleep(self.delay_for(attempt)).await,
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Race an arbitrary future against a cancellation token, returning `None`
/// if the token fires first. With no token, the future always runs to
/// completion.
pub async fn race_cancellation<T>(
    cancellation: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    match cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                out = fut => Some(out),
            }
        }
        None => Some(fut.await),
    }
}

/// Map a `reqwest` transport error to an [`AgentError`]. Connection-level
/// failures (reset, timeout, DNS) carry no HTTP status and are always
/// retryable; everything else becomes a [`AgentError::ProviderError`] whose
/// retryability depends on the status code, if any was received.
pub fn transport_error(err: reqwest::Error) -> AgentError {
    if err.is_connect() || err.is_timeout() {
        AgentError::Transport(err.to_string())
    } else {
        AgentError::ProviderError {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = policy
            .run(None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AgentError::ProviderError {
                            status: Some(503),
                            message: "unavailable".to_string(),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_429_4xx() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<i32, AgentError> = policy
            .run(None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AgentError::ProviderError {
                        status: Some(404),
                        message: "not found".to_string(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_first_attempt() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<i32, AgentError> = policy.run(Some(&token), || async { Ok(1) }).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_aborts_mid_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
        };
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });
        let result: Result<i32, AgentError> = policy
            .run(Some(&token), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AgentError::ProviderError {
                        status: Some(503),
                        message: "unavailable".to_string(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transport_error_classifies_connect_failure_as_retryable() {
        // reqwest::Error has no public constructor for connect/timeout
        // variants outside an actual failed request, so this is exercised
        // end-to-end by the provider integration tests instead; here we
        // just confirm the always-retryable contract on the mapped variant.
        let err = AgentError::Transport("connection reset".to_string());
        assert!(err.is_retryable());
    }
}
