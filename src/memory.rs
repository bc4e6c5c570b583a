//! Conversation-memory compaction strategies.
//!
//! Given a history and a configured maximum message count, a
//! [`MemoryStrategy`] produces a (possibly shorter) history for the next
//! LLM call. The strategy never drops the caller's current-turn message —
//! callers apply [`MemoryStrategy::compact`] *after* appending the current
//! turn, and every strategy below preserves the tail of the slice it's
//! given.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, Role};
use crate::provider::LLM;

const SUMMARIZATION_PROMPT: &str =
    "Summarize the following conversation excerpt in a few sentences, \
     preserving any facts, decisions, and tool results a future turn would need:";

/// Produces a (possibly shorter) history for the next LLM call.
#[async_trait]
pub trait MemoryStrategy: Send + Sync {
    async fn compact(&self, history: &mut Vec<Message>, cancellation: Option<&CancellationToken>);
    fn name(&self) -> &str;
}

/// Identity — no compaction.
pub struct AllStrategy;

#[async_trait]
impl MemoryStrategy for AllStrategy {
    async fn compact(&self, _history: &mut Vec<Message>, _cancellation: Option<&CancellationToken>) {}

    fn name(&self) -> &str {
        "all"
    }
}

/// Keep the system prompt (if any) and the most recent `N-1` non-system
/// messages; drop the rest.
pub struct WindowStrategy {
    pub max_messages: usize,
}

impl WindowStrategy {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }
}

/// Split `history` into its (at most one) leading system message and the
/// remaining non-system messages, in order.
fn split_system(history: &[Message]) -> (Option<Message>, Vec<Message>) {
    let mut system = None;
    let mut rest = Vec::with_capacity(history.len());
    for m in history {
        if system.is_none() && m.role == Role::System {
            system = Some(m.clone());
        } else {
            rest.push(m.clone());
        }
    }
    (system, rest)
}

fn apply_window(history: &mut Vec<Message>, max_messages: usize) {
    let (system, rest) = split_system(history);
    let budget = if system.is_some() {
        max_messages.saturating_sub(1)
    } else {
        max_messages
    };
    let kept_start = rest.len().saturating_sub(budget);
    let mut result = Vec::with_capacity(max_messages.min(history.len()));
    if let Some(sys) = system {
        result.push(sys);
    }
    result.extend_from_slice(&rest[kept_start..]);
    *history = result;
}

#[async_trait]
impl MemoryStrategy for WindowStrategy {
    async fn compact(&self, history: &mut Vec<Message>, _cancellation: Option<&CancellationToken>) {
        if history.len() <= self.max_messages {
            return;
        }
        apply_window(history, self.max_messages);
    }

    fn name(&self) -> &str {
        "window"
    }
}

/// When the history exceeds `max_messages`, summarize the prefix slated for
/// removal with a (possibly distinct) LLM and replace it with one system
/// message; keep the tail. Summarizer failure falls back to
/// [`WindowStrategy`] semantics for this call.
pub struct SummarizeStrategy {
    pub max_messages: usize,
    summarizer: Arc<dyn LLM>,
}

impl SummarizeStrategy {
    pub fn new(max_messages: usize, summarizer: Arc<dyn LLM>) -> Self {
        Self {
            max_messages,
            summarizer,
        }
    }
}

#[async_trait]
impl MemoryStrategy for SummarizeStrategy {
    async fn compact(&self, history: &mut Vec<Message>, cancellation: Option<&CancellationToken>) {
        if history.len() <= self.max_messages {
            return;
        }
        let (system, rest) = split_system(history);
        let budget = if system.is_some() {
            self.max_messages.saturating_sub(1)
        } else {
            self.max_messages
        };
        // Keep the last `budget - 1` of the tail plus one slot for the
        // summary message, mirroring Window's accounting but reserving
        // room for the prepended summary.
        let tail_budget = budget.saturating_sub(1);
        let split_at = rest.len().saturating_sub(tail_budget);
        let (to_summarize, tail) = rest.split_at(split_at);

        if to_summarize.is_empty() {
            apply_window(history, self.max_messages);
            return;
        }

        let excerpt = to_summarize
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{}\n\n{}", SUMMARIZATION_PROMPT, excerpt);

        match self.summarizer.complete(&prompt, cancellation).await {
            Ok(summary) => {
                let mut result = Vec::with_capacity(self.max_messages);
                if let Some(sys) = system {
                    result.push(sys);
                }
                result.push(Message::system(format!("[conversation summary] {}", summary)));
                result.extend_from_slice(tail);
                *history = result;
            }
            Err(e) => {
                log::warn!(
                    "agentflow: memory summarization failed ({}), falling back to window compaction",
                    e
                );
                apply_window(history, self.max_messages);
            }
        }
    }

    fn name(&self) -> &str {
        "summarize"
    }
}

/// Keep (a) the system prompt, (b) any message carrying a tool call or a
/// tool result, (c) the most recent `N/2` messages; summarize the
/// remainder into one message prepended after the system prompt.
pub struct SelectiveStrategy {
    pub max_messages: usize,
    summarizer: Arc<dyn LLM>,
}

impl SelectiveStrategy {
    pub fn new(max_messages: usize, summarizer: Arc<dyn LLM>) -> Self {
        Self {
            max_messages,
            summarizer,
        }
    }
}

#[async_trait]
impl MemoryStrategy for SelectiveStrategy {
    async fn compact(&self, history: &mut Vec<Message>, cancellation: Option<&CancellationToken>) {
        if history.len() <= self.max_messages {
            return;
        }
        let (system, rest) = split_system(history);
        let recent_budget = self.max_messages / 2;
        let recent_start = rest.len().saturating_sub(recent_budget);
        let recent_indices: std::collections::HashSet<usize> = (recent_start..rest.len()).collect();

        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (i, m) in rest.iter().enumerate() {
            let is_tool_correlated = !m.tool_calls.is_empty() || m.tool_call_id.is_some();
            if is_tool_correlated || recent_indices.contains(&i) {
                kept.push(m.clone());
            } else {
                dropped.push(m.clone());
            }
        }

        let mut result = Vec::new();
        if let Some(sys) = system {
            result.push(sys);
        }
        if !dropped.is_empty() {
            let excerpt = dropped
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!("{}\n\n{}", SUMMARIZATION_PROMPT, excerpt);
            match self.summarizer.complete(&prompt, cancellation).await {
                Ok(summary) => {
                    result.push(Message::system(format!("[conversation summary] {}", summary)));
                }
                Err(e) => {
                    log::warn!(
                        "agentflow: selective-compaction summarization failed ({}), dropping unsummarized prefix",
                        e
                    );
                }
            }
        }
        result.extend(kept);
        *history = result;
    }

    fn name(&self) -> &str {
        "selective"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::message::Response;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockLLM {
        replies: Mutex<Vec<String>>,
    }

    impl MockLLM {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LLM for MockLLM {
        async fn chat(
            &self,
            _messages: &[Message],
            _cancellation: Option<&CancellationToken>,
        ) -> Result<Response, AgentError> {
            unimplemented!("summarizer only uses complete")
        }

        async fn complete(&self, _prompt: &str, _cancellation: Option<&CancellationToken>) -> Result<String, AgentError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(AgentError::ProviderError {
                    status: None,
                    message: "no more scripted replies".to_string(),
                })
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    fn six_turns() -> Vec<Message> {
        let mut history = vec![Message::system("be terse")];
        for i in 0..6 {
            history.push(Message::user(format!("turn {}", i)));
        }
        history
    }

    #[tokio::test]
    async fn all_never_compacts() {
        let mut history = six_turns();
        let original_len = history.len();
        AllStrategy.compact(&mut history, None).await;
        assert_eq!(history.len(), original_len);
    }

    #[tokio::test]
    async fn window_keeps_system_plus_recent_n_minus_1() {
        let mut history = six_turns();
        WindowStrategy::new(4).compact(&mut history, None).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history.last().unwrap().content, "turn 5");
    }

    #[tokio::test]
    async fn window_is_idempotent() {
        let mut once = six_turns();
        WindowStrategy::new(4).compact(&mut once, None).await;
        let mut twice = once.clone();
        WindowStrategy::new(4).compact(&mut twice, None).await;
        assert_eq!(
            once.iter().map(|m| &m.content).collect::<Vec<_>>(),
            twice.iter().map(|m| &m.content).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn window_never_drops_under_the_bound() {
        let mut history = vec![Message::user("only one")];
        WindowStrategy::new(4).compact(&mut history, None).await;
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn summarize_replaces_dropped_prefix_with_one_message() {
        let summarizer = Arc::new(MockLLM::new(vec!["summary of early turns"]));
        let mut history = six_turns();
        SummarizeStrategy::new(4, summarizer).compact(&mut history, None).await;
        assert_eq!(history.len(), 4);
        assert!(history[1].content.contains("summary of early turns"));
        assert_eq!(history.last().unwrap().content, "turn 5");
    }

    #[tokio::test]
    async fn summarize_falls_back_to_window_on_summarizer_failure() {
        let summarizer = Arc::new(MockLLM::new(vec![])); // no scripted replies -> errors
        let mut history = six_turns();
        let mut windowed = history.clone();
        SummarizeStrategy::new(4, summarizer).compact(&mut history, None).await;
        WindowStrategy::new(4).compact(&mut windowed, None).await;
        assert_eq!(
            history.iter().map(|m| &m.content).collect::<Vec<_>>(),
            windowed.iter().map(|m| &m.content).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn selective_keeps_tool_correlated_messages_outside_the_recent_window() {
        let summarizer = Arc::new(MockLLM::new(vec!["summary"]));
        let mut history = vec![Message::system("sys")];
        history.push(Message::user("turn 0"));
        history.push(Message::tool_result("call-1", "tool result 0"));
        for i in 1..6 {
            history.push(Message::user(format!("turn {}", i)));
        }
        SelectiveStrategy::new(4, summarizer).compact(&mut history, None).await;
        assert!(history.iter().any(|m| m.tool_call_id.as_deref() == Some("call-1")));
    }
}
