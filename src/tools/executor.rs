// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool execution engine
//!
//! Runs requested tool calls one after another. A failing or unknown tool
//! does not fail the turn: its error text becomes the result the model sees.

use std::sync::Arc;

use crate::llm::message::ToolCall;
use crate::llm::provider::ToolDefinition;

use super::ToolRegistry;

/// Result of one tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub call: ToolCall,
    pub output: String,
    pub is_error: bool,
}

/// Executes tool calls against a registry
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Get tool definitions for the LLM
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one call. Empty arguments are passed as `{}`.
    pub async fn execute(&self, call: &ToolCall) -> ToolRun {
        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(target: "txing.tools", tool = %call.name, "model requested unknown tool");
            return ToolRun {
                call: call.clone(),
                output: format!("Unknown tool: {}", call.name),
                is_error: true,
            };
        };

        let arguments = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };

        match tool.call(arguments).await {
            Ok(output) => {
                tracing::debug!(
                    target: "txing.tools",
                    tool = %call.name,
                    output = %truncate_output(&output, 100),
                    "tool finished"
                );
                ToolRun {
                    call: call.clone(),
                    output,
                    is_error: false,
                }
            }
            Err(err) => {
                tracing::warn!(target: "txing.tools", tool = %call.name, error = %err, "tool failed");
                ToolRun {
                    call: call.clone(),
                    output: format!("Tool {} failed: {}", call.name, err),
                    is_error: true,
                }
            }
        }
    }

    /// Run every call in order
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolRun> {
        let mut runs = Vec::with_capacity(calls.len());
        for call in calls {
            runs.push(self.execute(call).await);
        }
        runs
    }
}

/// Truncate output for display
fn truncate_output(s: &str, max_chars: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let head: String = flat.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxingError;
    use crate::tools::FnTool;
    use serde_json::json;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new(
            ToolDefinition {
                name: "echo".to_string(),
                description: "echo".to_string(),
                parameters: json!({"type": "object"}),
            },
            |args| async move { Ok(format!("got {}", args)) },
        )));
        registry.register(Arc::new(FnTool::new(
            ToolDefinition {
                name: "broken".to_string(),
                description: "always fails".to_string(),
                parameters: json!({"type": "object"}),
            },
            |_| async { Err(TxingError::ToolExecution("backend unavailable".to_string())) },
        )));
        ToolExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let run = executor().execute(&ToolCall::new("c1", "echo", r#"{"a":1}"#)).await;
        assert!(!run.is_error);
        assert_eq!(run.output, r#"got {"a":1}"#);
        assert_eq!(run.call.id, "c1");
    }

    #[tokio::test]
    async fn test_empty_arguments_become_object() {
        let run = executor().execute(&ToolCall::new("c1", "echo", "")).await;
        assert_eq!(run.output, "got {}");
    }

    #[tokio::test]
    async fn test_tool_error_becomes_text() {
        let run = executor().execute(&ToolCall::new("c2", "broken", "{}")).await;
        assert!(run.is_error);
        assert!(run.output.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_text() {
        let run = executor().execute(&ToolCall::new("c3", "teleport", "{}")).await;
        assert!(run.is_error);
        assert_eq!(run.output, "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn test_execute_all_keeps_order() {
        let calls = vec![
            ToolCall::new("1", "echo", r#"{"n":1}"#),
            ToolCall::new("2", "broken", "{}"),
            ToolCall::new("3", "echo", r#"{"n":3}"#),
        ];
        let runs = executor().execute_all(&calls).await;
        let ids: Vec<&str> = runs.iter().map(|r| r.call.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short\ntext", 100), "short text");
        assert_eq!(truncate_output("abcdef", 3), "abc...");
        assert_eq!(truncate_output("你好世界", 2), "你好...");
    }
}
