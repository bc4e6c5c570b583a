//! Scientific calculator tool.
//!
//! Illustrative, not structurally interesting — evaluates an arithmetic
//! expression string via [`evalexpr`] and returns the numeric result as
//! text.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::ToolValue;
use crate::tool::{ParamType, Tool, ToolParameter, ToolSchema};

#[derive(Debug, Clone)]
pub enum CalculatorError {
    InvalidExpression(String),
    NotANumber(String),
}

impl fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalculatorError::InvalidExpression(msg) => write!(f, "invalid expression: {}", msg),
            CalculatorError::NotANumber(msg) => write!(f, "result is not a number: {}", msg),
        }
    }
}

impl std::error::Error for CalculatorError {}

#[derive(Default)]
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, expression: &str) -> Result<f64, CalculatorError> {
        let value = evalexpr::eval(expression)
            .map_err(|e| CalculatorError::InvalidExpression(e.to_string()))?;
        value
            .as_number()
            .map_err(|_| CalculatorError::NotANumber(expression.to_string()))
    }
}

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "evaluates an arithmetic expression and returns the numeric result"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description()).with_parameter(
            ToolParameter::new("expression", ParamType::String, "arithmetic expression, e.g. \"2 + 2 * 3\"")
                .required(),
        )
    }

    async fn execute(
        &self,
        args: HashMap<String, ToolValue>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError> {
        if cancellation.is_some_and(|t| t.is_cancelled()) {
            return Err(AgentError::Cancelled);
        }
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ValidationError("missing `expression`".to_string()))?;
        self.evaluate(expression)
            .map(|n| n.to_string())
            .map_err(|e| AgentError::InvalidArgument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_operator_precedence() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("2 + 2 * 3").unwrap(), 8.0);
        assert_eq!(calc.evaluate("(2 + 2) * 3").unwrap(), 12.0);
    }

    #[tokio::test]
    async fn execute_returns_stringified_result() {
        let calc = Calculator::new();
        let mut args = HashMap::new();
        args.insert("expression".to_string(), ToolValue::String("25 + 34".to_string()));
        assert_eq!(calc.execute(args, None).await.unwrap(), "59");
    }

    #[tokio::test]
    async fn malformed_expression_is_invalid_argument() {
        let calc = Calculator::new();
        let mut args = HashMap::new();
        args.insert("expression".to_string(), ToolValue::String("2 +".to_string()));
        assert!(matches!(
            calc.execute(args, None).await,
            Err(AgentError::InvalidArgument(_))
        ));
    }
}
