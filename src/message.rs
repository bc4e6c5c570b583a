//! Core conversation data model: [`Message`], [`ToolCall`], [`Response`],
//! [`StreamChunk`], and the dynamic [`ToolValue`] used for tool arguments.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Role of a [`Message`] within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A request from the model to invoke a named tool with named arguments.
///
/// `id` is generated by the provider and correlates the later tool-result
/// [`Message`] (see [`Message::tool_call_id`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, ToolValue>,
}

/// A dynamic tool-argument value.
///
/// Tool arguments arrive as untyped JSON from the model. Rather than exposing
/// raw [`serde_json::Value`] past the dispatch boundary, arguments are
/// represented as this closed sum type and validated against a
/// [`ToolSchema`](crate::tool::ToolSchema) at dispatch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ToolValue>),
    Object(HashMap<String, ToolValue>),
}

impl ToolValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ToolValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ToolValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<JsonValue> for ToolValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => ToolValue::Null,
            JsonValue::Bool(b) => ToolValue::Bool(b),
            JsonValue::Number(n) => ToolValue::Number(n.as_f64().unwrap_or_default()),
            JsonValue::String(s) => ToolValue::String(s),
            JsonValue::Array(arr) => ToolValue::Array(arr.into_iter().map(ToolValue::from).collect()),
            JsonValue::Object(obj) => ToolValue::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, ToolValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<ToolValue> for JsonValue {
    fn from(v: ToolValue) -> Self {
        match v {
            ToolValue::Null => JsonValue::Null,
            ToolValue::Bool(b) => JsonValue::Bool(b),
            ToolValue::Number(n) => serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ToolValue::String(s) => JsonValue::String(s),
            ToolValue::Array(arr) => JsonValue::Array(arr.into_iter().map(JsonValue::from).collect()),
            ToolValue::Object(obj) => {
                JsonValue::Object(obj.into_iter().map(|(k, v)| (k, JsonValue::from(v))).collect())
            }
        }
    }
}

/// A role-tagged utterance in a conversation. Immutable once appended to a
/// [`ConversationHistory`](crate::agent::ConversationHistory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present on assistant messages that request tool invocations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Present on tool-role messages; correlates with a [`ToolCall::id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Opaque, provider-supplied metadata attached to a [`Response`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Provider-specific diagnostics (safety flags, block reasons, etc.)
    /// that don't warrant a first-class field.
    #[serde(default)]
    pub extra: HashMap<String, JsonValue>,
}

/// The result of one LLM invocation.
///
/// Terminal (no further tool dispatch expected) when [`Response::tool_calls`]
/// is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// One incremental piece of a streamed response.
///
/// An error chunk (`error.is_some()`) terminates the stream: no further
/// chunks follow it on the same channel.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// New text since the previous chunk.
    pub delta: String,
    /// Full content accumulated so far, including `delta`.
    pub content: String,
    /// Present only on the final, successful chunk.
    pub finish_reason: Option<String>,
    /// Present only on a terminal error chunk.
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

impl StreamChunk {
    pub fn delta(delta: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            content: content.into(),
            finish_reason: None,
            error: None,
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn final_chunk(content: impl Into<String>, finish_reason: impl Into<String>, metadata: ResponseMetadata) -> Self {
        Self {
            delta: String::new(),
            content: content.into(),
            finish_reason: Some(finish_reason.into()),
            error: None,
            metadata,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            content: String::new(),
            finish_reason: None,
            error: Some(message.into()),
            metadata: ResponseMetadata::default(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_terminal_iff_no_tool_calls() {
        let mut r = Response {
            content: "hi".to_string(),
            tool_calls: Vec::new(),
            metadata: ResponseMetadata::default(),
        };
        assert!(r.is_terminal());
        r.tool_calls.push(ToolCall {
            id: "1".to_string(),
            name: "add".to_string(),
            arguments: HashMap::new(),
        });
        assert!(!r.is_terminal());
    }

    #[test]
    fn tool_value_json_roundtrip() {
        let json = serde_json::json!({"a": 1.0, "b": [true, null, "x"]});
        let tv = ToolValue::from(json.clone());
        let back: JsonValue = tv.into();
        assert_eq!(json, back);
    }

    #[test]
    fn tool_result_message_carries_correlation_id() {
        let msg = Message::tool_result("call-1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
    }
}
