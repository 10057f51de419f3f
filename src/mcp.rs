//! MCP server integration.
//!
//! An [`McpServer`] describes how to reach a server; the agent connects at
//! the start of each call, folds the server's tools into its registry and
//! closes the connection when the call ends. Connections are never shared
//! across calls.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, RawContent};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{ClientHandler, ServiceExt};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::Error;
use crate::model::ToolDefinition;

/// Trait for connected MCP clients the agent can list and call tools on.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// List the tools the server offers.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error>;

    /// Execute a tool and flatten its result to a single JSON value.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, Error>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> Result<(), Error>;
}

/// [`McpClient`] over an rmcp client session.
pub struct RmcpClient<S: ClientHandler> {
    service: RwLock<Option<RunningService<RoleClient, S>>>,
}

impl<S: ClientHandler> RmcpClient<S> {
    pub fn new(service: RunningService<RoleClient, S>) -> Self {
        Self {
            service: RwLock::new(Some(service)),
        }
    }
}

#[async_trait]
impl<S: ClientHandler> McpClient for RmcpClient<S> {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| Error::Mcp("connection already closed".to_string()))?;
        let result = service
            .list_tools(None)
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        Ok(result.tools.iter().map(definition_from_mcp).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, Error> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| Error::Mcp("connection already closed".to_string()))?;
        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };
        let result = service
            .call_tool(params)
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        flatten_tool_result(name, result)
    }

    async fn close(&self) -> Result<(), Error> {
        let service = self.service.write().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| Error::Mcp(e.to_string()))?;
        }
        Ok(())
    }
}

fn definition_from_mcp(tool: &rmcp::model::Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.to_string(),
        description: tool.description.as_ref().map(|d| d.to_string()),
        parameters: Value::Object(tool.input_schema.as_ref().clone()),
    }
}

/// Flatten an MCP tool result to one JSON value.
///
/// Priority: the server's structured content, then text content that parses
/// as JSON, then remaining text wrapped as `{"response": [...]}`. A result
/// flagged `is_error` becomes an [`Error::Mcp`] carrying the flattened value.
pub(crate) fn flatten_tool_result(name: &str, result: CallToolResult) -> Result<Value, Error> {
    let mut parsed_text_content: Option<Value> = None;
    let mut raw_text_content: Vec<String> = Vec::new();

    for content in result.content {
        if let RawContent::Text(text_content) = content.raw {
            if let Ok(parsed) = serde_json::from_str::<Value>(&text_content.text) {
                parsed_text_content = Some(parsed);
            } else {
                raw_text_content.push(text_content.text);
            }
        }
    }

    let output = if let Some(structured) = result.structured_content {
        structured
    } else if let Some(parsed) = parsed_text_content {
        parsed
    } else if !raw_text_content.is_empty() {
        json!({ "response": raw_text_content })
    } else {
        json!({})
    };

    if result.is_error == Some(true) {
        return Err(Error::Mcp(format!(
            "tool `{}` reported an error: {}",
            name, output
        )));
    }
    Ok(output)
}

/// Trait for establishing an MCP connection.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn McpClient>, Error>;
}

#[async_trait]
impl<F, Fut> McpConnector for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Arc<dyn McpClient>, Error>> + Send,
{
    async fn connect(&self) -> Result<Arc<dyn McpClient>, Error> {
        self().await
    }
}

/// An MCP server registration: a display name, how to connect, and an
/// optional allow-list restricting which of its tools the agent may use.
#[derive(Clone)]
pub struct McpServer {
    name: String,
    connector: Arc<dyn McpConnector>,
    allowed_tools: Option<Vec<String>>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("allowed_tools", &self.allowed_tools)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    pub fn new(name: impl Into<String>, connector: impl McpConnector + 'static) -> Self {
        Self {
            name: name.into(),
            connector: Arc::new(connector),
            allowed_tools: None,
        }
    }

    /// A server reached over the MCP streamable HTTP transport.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self::new(name, move || {
            let url = url.clone();
            async move {
                let transport = StreamableHttpClientTransport::from_uri(url);
                let service = ()
                    .serve(transport)
                    .await
                    .map_err(|e| Error::Mcp(e.to_string()))?;
                Ok(Arc::new(RmcpClient::new(service)) as Arc<dyn McpClient>)
            }
        })
    }

    /// Restrict which of the server's tools are registered. Tools outside
    /// the list are not advertised to the model at all.
    pub fn with_allowed_tools(mut self, allowed_tools: Vec<String>) -> Self {
        self.allowed_tools = Some(allowed_tools);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn connect(&self) -> Result<McpConnection, Error> {
        let client = self.connector.connect().await?;
        Ok(McpConnection {
            name: self.name.clone(),
            allowed: self.allowed_tools.clone(),
            client,
        })
    }
}

/// A live connection scoped to one agent call.
pub(crate) struct McpConnection {
    pub(crate) name: String,
    pub(crate) allowed: Option<Vec<String>>,
    pub(crate) client: Arc<dyn McpClient>,
}

/// Close every connection, logging failures instead of propagating them;
/// by the time this runs the call's outcome is already decided.
pub(crate) async fn close_all(connections: &mut Vec<McpConnection>) {
    let closing: Vec<McpConnection> = connections.drain(..).collect();
    let results =
        futures::future::join_all(closing.iter().map(|connection| connection.client.close()))
            .await;
    for (connection, result) in closing.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!("failed to close MCP server `{}`: {}", connection.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;

    #[test]
    fn test_flatten_prefers_structured_content() {
        let mut result = CallToolResult::success(vec![Content::text("{\"from_text\": true}")]);
        result.structured_content = Some(json!({"from_structured": true}));
        let output = flatten_tool_result("t", result).unwrap();
        assert_eq!(output, json!({"from_structured": true}));
    }

    #[test]
    fn test_flatten_parses_json_text() {
        let result = CallToolResult::success(vec![Content::text("{\"count\": 3}")]);
        let output = flatten_tool_result("t", result).unwrap();
        assert_eq!(output, json!({"count": 3}));
    }

    #[test]
    fn test_flatten_wraps_plain_text() {
        let result = CallToolResult::success(vec![
            Content::text("first line"),
            Content::text("second line"),
        ]);
        let output = flatten_tool_result("t", result).unwrap();
        assert_eq!(output, json!({"response": ["first line", "second line"]}));
    }

    #[test]
    fn test_flatten_empty_result() {
        let result = CallToolResult::success(vec![]);
        let output = flatten_tool_result("t", result).unwrap();
        assert_eq!(output, json!({}));
    }

    #[test]
    fn test_flatten_error_result() {
        let result = CallToolResult::error(vec![Content::text("backend unreachable")]);
        let err = flatten_tool_result("lookup", result).unwrap_err();
        match err {
            Error::Mcp(message) => {
                assert!(message.contains("lookup"));
                assert!(message.contains("backend unreachable"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
