//! Tool capability contract: [`Tool`], [`ToolSchema`], and [`ToolRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::ToolValue;

/// JSON-Schema-subset type tag for a [`ToolParameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// Declarative description of one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<ToolValue>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: ToolValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declarative description of a tool: name, description, and parameters.
///
/// Consumed by providers that advertise tools to the model (back end A's
/// `tools[]`) and by the [`ToolRegistry`] for argument validation at
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render this schema as the JSON-Schema-draft-7 subset back end A
    /// advertises: `{type:"object", properties:{...}, required:[...]}`.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let type_str = match param.param_type {
                ParamType::String => "string",
                ParamType::Number => "number",
                ParamType::Integer => "integer",
                ParamType::Boolean => "boolean",
                ParamType::Array => "array",
                ParamType::Object => "object",
            };
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": type_str,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate an argument map against this schema.
    ///
    /// Checks only that every required parameter is present; value-level
    /// type checking is left to the tool body (the source data is already
    /// typed as [`ToolValue`] by the time it reaches here).
    pub fn validate(&self, args: &HashMap<String, ToolValue>) -> Result<(), AgentError> {
        for param in &self.parameters {
            if param.required && !args.contains_key(&param.name) {
                return Err(AgentError::ValidationError(format!(
                    "missing required parameter `{}` for tool `{}`",
                    param.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A named, schema-described capability an agent may invoke.
///
/// `execute` receives the caller's [`CancellationToken`], if one is in play,
/// and must honor it: check it before starting any blocking work, and where
/// the tool body itself awaits something cancellable (a network call, a
/// long read), race that await against `token.cancelled()` and return
/// [`AgentError::Cancelled`] if it fires first.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> ToolSchema;
    async fn execute(
        &self,
        args: HashMap<String, ToolValue>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError>;
}

/// A name-keyed set of tools owned by an Agent.
///
/// Invariants: names are non-empty and unique within a registry; the
/// registry map and the cached schema list stay in agreement — every
/// schema corresponds to a registered tool and vice versa. Both are updated
/// atomically by [`ToolRegistry::add_tool`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    schemas: Vec<ToolSchema>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            schemas: Vec::new(),
        }
    }

    /// Register a tool. Rejects an empty name or a name already present.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(AgentError::InvalidArgument(
                "tool name must not be empty".to_string(),
            ));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::AlreadyExists(format!(
                "tool `{}` is already registered",
                name
            )));
        }
        let schema = tool.schema();
        self.tools.insert(name, tool);
        self.schemas.push(schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas advertised to a provider, in registration order.
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Dispatch a single call by name, validating arguments against the
    /// tool's schema first. Returns `not-found` if the name is unknown.
    pub async fn dispatch(
        &self,
        name: &str,
        args: HashMap<String, ToolValue>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::NotFound(format!("tool `{}` is not registered", name)))?;
        tool.schema().validate(&args)?;
        tool.execute(args, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its `text` argument"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("echo", "echoes its `text` argument")
                .with_parameter(ToolParameter::new("text", ParamType::String, "text to echo").required())
        }
        async fn execute(
            &self,
            args: HashMap<String, ToolValue>,
            _cancellation: Option<&CancellationToken>,
        ) -> Result<String, AgentError> {
            Ok(args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        }
    }

    #[tokio::test]
    async fn add_tool_rejects_empty_name_and_duplicates() {
        struct Nameless;
        #[async_trait]
        impl Tool for Nameless {
            fn name(&self) -> &str {
                ""
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> ToolSchema {
                ToolSchema::new("", "")
            }
            async fn execute(
                &self,
                _args: HashMap<String, ToolValue>,
                _cancellation: Option<&CancellationToken>,
            ) -> Result<String, AgentError> {
                Ok(String::new())
            }
        }

        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.add_tool(Arc::new(Nameless)),
            Err(AgentError::InvalidArgument(_))
        ));

        registry.add_tool(Arc::new(Echo)).unwrap();
        assert!(matches!(
            registry.add_tool(Arc::new(Echo)),
            Err(AgentError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn schema_list_matches_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.add_tool(Arc::new(Echo)).unwrap();
        assert_eq!(registry.schemas().len(), registry.len());
        assert_eq!(registry.schemas()[0].name, "echo");
    }

    #[tokio::test]
    async fn dispatch_validates_required_args_before_execute() {
        let mut registry = ToolRegistry::new();
        registry.add_tool(Arc::new(Echo)).unwrap();

        let err = registry
            .dispatch("echo", HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ValidationError(_)));

        let mut args = HashMap::new();
        args.insert("text".to_string(), ToolValue::String("hi".to_string()));
        let out = registry.dispatch("echo", args, None).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch("missing", HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }
}
