//! The per-call tool registry.
//!
//! Built fresh at the start of every agent call from the configured local
//! tools and connected MCP servers. Tool names share one namespace; a
//! collision anywhere fails the build before any model request is sent.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::error::Error;
use crate::mcp::{McpClient, McpConnection};
use crate::model::{ContentBlock, ToolCall, ToolDefinition, ToolOutput};
use crate::tools::Tool;

enum ToolBackend {
    Local(Tool),
    Mcp(Arc<dyn McpClient>),
}

struct RegistryEntry {
    definition: ToolDefinition,
    backend: ToolBackend,
    origin: String,
}

/// The result of executing one tool call. Failures are captured here, not
/// raised: the model gets them back as error results and can react.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: ToolOutput,
    pub is_error: bool,
}

impl ToolOutcome {
    /// The `tool_result` block the follow-up request carries.
    pub fn into_block(self) -> ContentBlock {
        let is_error = self.is_error;
        self.output.into_result_block(is_error)
    }
}

/// All tools available to one agent call, keyed by name.
pub struct ToolRegistry {
    entries: HashMap<String, RegistryEntry>,
    order: Vec<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Collect local tools and the tools of every connection into one
    /// namespace. Allow-lists are applied before anything is registered, so
    /// a filtered-out tool can never cause a collision.
    pub(crate) async fn build(
        local_tools: &[Tool],
        connections: &[McpConnection],
    ) -> Result<Self, Error> {
        let mut registry = Self {
            entries: HashMap::new(),
            order: Vec::new(),
        };

        for tool in local_tools {
            registry.insert(
                tool.definition().clone(),
                ToolBackend::Local(tool.clone()),
                "local tools".to_string(),
            )?;
        }

        for connection in connections {
            let origin = format!("MCP server `{}`", connection.name);
            for definition in connection.client.list_tools().await? {
                if let Some(allowed) = &connection.allowed {
                    if !allowed.iter().any(|name| name == &definition.name) {
                        continue;
                    }
                }
                registry.insert(
                    definition,
                    ToolBackend::Mcp(connection.client.clone()),
                    origin.clone(),
                )?;
            }
        }

        tracing::debug!("tool registry built with {} tools", registry.order.len());
        Ok(registry)
    }

    fn insert(
        &mut self,
        definition: ToolDefinition,
        backend: ToolBackend,
        origin: String,
    ) -> Result<(), Error> {
        let name = definition.name.clone();
        if let Some(existing) = self.entries.get(&name) {
            return Err(Error::DuplicateTool {
                name,
                first: existing.origin.clone(),
                second: origin,
            });
        }
        self.order.push(name.clone());
        self.entries.insert(
            name,
            RegistryEntry {
                definition,
                backend,
                origin,
            },
        );
        Ok(())
    }

    /// Definitions in registration order: local tools first, then each
    /// server's tools in the order servers were configured.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| entry.definition.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run one call. Unknown tools and handler failures come back as error
    /// outcomes carrying `{"ok": false, "error": ...}`.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        tracing::info!("tool `{}` requested", call.name);
        let result = match self.entries.get(&call.name) {
            Some(entry) => match &entry.backend {
                ToolBackend::Local(tool) => tool
                    .invoke(call.arguments.clone())
                    .await
                    .map_err(|e| e.to_string()),
                ToolBackend::Mcp(client) => client
                    .call_tool(&call.name, call.arguments.clone())
                    .await
                    .map_err(|e| e.to_string()),
            },
            None => Err(format!("unknown tool `{}`", call.name)),
        };

        match result {
            Ok(output) => ToolOutcome {
                output: ToolOutput {
                    name: call.name.clone(),
                    call_id: call.call_id.clone(),
                    output,
                },
                is_error: false,
            },
            Err(message) => {
                tracing::warn!("tool `{}` failed: {}", call.name, message);
                ToolOutcome {
                    output: ToolOutput {
                        name: call.name.clone(),
                        call_id: call.call_id.clone(),
                        output: json!({ "ok": false, "error": message }),
                    },
                    is_error: true,
                }
            }
        }
    }
}
