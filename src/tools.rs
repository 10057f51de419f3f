//! Local tools the agent can execute on the model's behalf.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::model::ToolDefinition;

/// Error type for tool execution.
///
/// Handler failures are not fatal to a turn: the agent reports them back to
/// the model as error results and lets it react.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Message(String),

    #[error("invalid tool arguments: {0}")]
    Arguments(#[from] serde_json::Error),
}

impl ToolError {
    pub fn message(text: impl Into<String>) -> Self {
        ToolError::Message(text.into())
    }
}

/// Trait for tool handlers invoked with JSON arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        self(arguments).await
    }
}

/// A locally executed tool: a definition advertised to the model plus the
/// handler run when the model calls it.
#[derive(Clone)]
pub struct Tool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
    default_arguments: Option<Map<String, Value>>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(definition: ToolDefinition, handler: impl ToolHandler + 'static) -> Self {
        Self {
            definition,
            handler: Arc::new(handler),
            default_arguments: None,
        }
    }

    /// Build a tool from a name, an input schema and a handler closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, parameters: Value, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(ToolDefinition::new(name, parameters), handler)
    }

    /// Build a tool whose input schema is derived from `T` and whose handler
    /// receives already-deserialized arguments.
    pub fn typed<T, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        T: serde::de::DeserializeOwned + schemars::JsonSchema + Send,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(
            ToolDefinition::from_schema::<T>(name),
            move |arguments: Value| {
                let handler = handler.clone();
                async move {
                    let input: T = serde_json::from_value(arguments)?;
                    handler(input).await
                }
            },
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.definition = self.definition.with_description(description);
        self
    }

    /// Arguments filled in before invocation for keys the model omitted.
    /// The model's own values always win.
    pub fn with_default_arguments(mut self, defaults: Map<String, Value>) -> Self {
        self.default_arguments = Some(defaults);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Run the handler with defaults merged into the model's arguments.
    pub async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        self.handler.call(self.merge_default_arguments(arguments)).await
    }

    fn merge_default_arguments(&self, arguments: Value) -> Value {
        let Some(defaults) = &self.default_arguments else {
            return arguments;
        };
        match arguments {
            Value::Object(mut map) => {
                for (key, value) in defaults {
                    if !map.contains_key(key) {
                        map.insert(key.clone(), value.clone());
                    }
                }
                Value::Object(map)
            }
            Value::Null => Value::Object(defaults.clone()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> Tool {
        Tool::from_fn("echo", json!({"type": "object"}), |arguments| async move {
            Ok(arguments)
        })
    }

    #[tokio::test]
    async fn test_invoke_passes_arguments_through() {
        let tool = echo_tool();
        let output = tool.invoke(json!({"a": 1})).await.unwrap();
        assert_eq!(output, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_defaults_fill_missing_keys_only() {
        let defaults = match json!({"unit": "celsius", "city": "nowhere"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let tool = echo_tool().with_default_arguments(defaults);

        let output = tool.invoke(json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(output, json!({"city": "Oslo", "unit": "celsius"}));

        let output = tool.invoke(Value::Null).await.unwrap();
        assert_eq!(output, json!({"city": "nowhere", "unit": "celsius"}));
    }

    #[tokio::test]
    async fn test_typed_tool_deserializes_input() {
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        struct Args {
            city: String,
        }

        let tool = Tool::typed::<Args, _, _>("weather", |args| async move {
            Ok(json!({ "forecast": format!("sunny in {}", args.city) }))
        });
        assert_eq!(tool.name(), "weather");
        assert!(tool.definition().parameters["properties"]["city"].is_object());

        let output = tool.invoke(json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(output, json!({"forecast": "sunny in Oslo"}));
    }

    #[tokio::test]
    async fn test_typed_tool_rejects_bad_input() {
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        struct Args {
            #[allow(dead_code)]
            city: String,
        }

        let tool = Tool::typed::<Args, _, _>("weather", |_args| async move { Ok(json!({})) });
        let err = tool.invoke(json!({"city": 7})).await.unwrap_err();
        assert!(matches!(err, ToolError::Arguments(_)));
    }
}
