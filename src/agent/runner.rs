// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool-calling agent runner
//!
//! Drives the state machine in [`super::state`] against a
//! [`ToolCallingModel`]. Every chunk goes through one hook in the order it
//! was produced: model deltas, then the tool-request summary, then the
//! tool-result summary, then the next model step.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TxingError};
use crate::llm::chunk::{Chunk, Hook};
use crate::llm::message::{AgentMessage, ToolCall};
use crate::llm::provider::{ModelTurnRequest, ToolCallingModel, ToolDefinition};
use crate::tools::{ShowMsgRegistry, ToolExecutor};

use super::state::{transition, AgentAction, AgentEvent, AgentState, ModelReply};

pub const DEFAULT_MAX_STEPS: usize = 500;
pub const DEFAULT_AGENT_MAX_TOKENS: u32 = 8192;

/// Append-only message log owned by one run
#[derive(Debug, Default)]
struct History {
    messages: Vec<AgentMessage>,
}

impl History {
    fn push(&mut self, message: AgentMessage) {
        self.messages.push(message);
    }

    fn last(&self) -> Option<&AgentMessage> {
        self.messages.last()
    }

    fn snapshot(&self) -> Vec<AgentMessage> {
        self.messages.clone()
    }

    fn into_vec(self) -> Vec<AgentMessage> {
        self.messages
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Full history, prompt included
    pub messages: Vec<AgentMessage>,
    /// Content of the last assistant message
    pub answer: String,
    /// Model calls made
    pub steps: usize,
    pub step_limit_reached: bool,
}

/// One agent instance. Cheap to build; each `run` owns its own history.
#[derive(Clone)]
pub struct ToolCallAgent {
    model: Arc<dyn ToolCallingModel>,
    model_name: String,
    executor: ToolExecutor,
    show_msgs: Arc<ShowMsgRegistry>,
    system_prompt: String,
    max_steps: usize,
    max_tokens: Option<u32>,
}

impl ToolCallAgent {
    pub fn new(
        model: Arc<dyn ToolCallingModel>,
        model_name: impl Into<String>,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            executor,
            show_msgs: Arc::new(ShowMsgRegistry::with_builtins()),
            system_prompt: "You are a helpful AI assistant that can use tools to solve problems."
                .to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens: Some(DEFAULT_AGENT_MAX_TOKENS),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Ceiling on model calls per run
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_show_msgs(mut self, show_msgs: Arc<ShowMsgRegistry>) -> Self {
        self.show_msgs = show_msgs;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run to completion for one user input.
    ///
    /// Tool failures are fed back to the model as text. Model transport
    /// errors, hook errors and cancellation end the run with an error.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        input: &str,
        hook: &dyn Hook,
    ) -> Result<AgentRun> {
        let tools = self.executor.tool_definitions();
        let mut history = History::default();
        history.push(AgentMessage::system(self.system_prompt.clone()));
        history.push(AgentMessage::user(input));

        let mut state = AgentState::Start;
        let mut event = AgentEvent::Started;
        let mut steps = 0usize;
        let mut step_limit_reached = false;

        tracing::info!(
            target: "txing.agent",
            model = %self.model_name,
            tools = tools.len(),
            max_steps = self.max_steps,
            "agent run started"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(TxingError::Cancelled);
            }

            let (next, action) = transition(state, event)?;
            tracing::trace!(target: "txing.agent", from = %state, to = %next, ?action, "transition");
            state = next;

            event = match action {
                AgentAction::CallModel => {
                    if steps >= self.max_steps {
                        tracing::warn!(
                            target: "txing.agent",
                            steps,
                            max_steps = self.max_steps,
                            "step limit reached, ending run"
                        );
                        step_limit_reached = true;
                        AgentEvent::StepLimitReached
                    } else {
                        steps += 1;
                        let reply = self.call_model(cancel, &history, &tools, hook).await?;
                        let kind = ModelReply::classify(&reply);
                        tracing::debug!(
                            target: "txing.agent",
                            step = steps,
                            tool_calls = reply.tool_calls.len(),
                            ?kind,
                            "model replied"
                        );
                        history.push(reply);
                        AgentEvent::ModelReplied(kind)
                    }
                }
                AgentAction::RunTools => {
                    let calls = pending_calls(&history);
                    for call in &calls {
                        self.run_tool(cancel, call, &mut history, hook).await?;
                    }
                    AgentEvent::ToolsFinished
                }
                AgentAction::RecordArgError => {
                    let message = arg_error_message(&pending_calls(&history));
                    self.emit_tool_result(&message, hook).await?;
                    history.push(message);
                    AgentEvent::ArgErrorRecorded
                }
                AgentAction::Finish => break,
            };
        }

        let answer = history
            .last()
            .filter(|m| m.role == crate::llm::message::Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        tracing::info!(target: "txing.agent", steps, step_limit_reached, "agent run finished");

        Ok(AgentRun {
            messages: history.into_vec(),
            answer,
            steps,
            step_limit_reached,
        })
    }

    async fn call_model(
        &self,
        cancel: &CancellationToken,
        history: &History,
        tools: &[ToolDefinition],
        hook: &dyn Hook,
    ) -> Result<AgentMessage> {
        let request = ModelTurnRequest {
            model: self.model_name.clone(),
            messages: history.snapshot(),
            tools: tools.to_vec(),
            max_tokens: self.max_tokens,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TxingError::Cancelled),
            reply = self.model.stream_turn(cancel, &request, hook) => reply,
        }
    }

    async fn run_tool(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        history: &mut History,
        hook: &dyn Hook,
    ) -> Result<()> {
        let show_msg = match self.show_msgs.request_msg(&call.name, &call.arguments) {
            Ok(msg) if !msg.is_empty() => msg,
            _ => format!("Calling tool: {}", call.name),
        };
        hook.on_chunk(Chunk::tool_request(
            call.id.clone(),
            call.name.clone(),
            call.arguments.clone(),
            show_msg,
        ))
        .await?;

        let run = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TxingError::Cancelled),
            run = self.executor.execute(call) => run,
        };

        let message = AgentMessage::tool(run.call.id, run.call.name, run.output);
        self.emit_tool_result(&message, hook).await?;
        history.push(message);
        Ok(())
    }

    async fn emit_tool_result(&self, message: &AgentMessage, hook: &dyn Hook) -> Result<()> {
        let name = message.tool_name.clone().unwrap_or_default();
        let show_msg = match self.show_msgs.response_msg(&name, &message.content) {
            Ok(msg) if !msg.is_empty() => msg,
            _ => format!("Tool call finished: {}", message.content),
        };
        hook.on_chunk(Chunk::tool_response(
            message.tool_call_id.clone().unwrap_or_default(),
            name,
            message.content.clone(),
            show_msg,
        ))
        .await
    }
}

impl std::fmt::Debug for ToolCallAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallAgent")
            .field("model_name", &self.model_name)
            .field("max_steps", &self.max_steps)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn pending_calls(history: &History) -> Vec<ToolCall> {
    history
        .last()
        .map(|m| m.tool_calls.clone())
        .unwrap_or_default()
}

/// The single synthetic tool message for a reply with malformed arguments
fn arg_error_message(calls: &[ToolCall]) -> AgentMessage {
    for call in calls {
        if let Err(err) = call.validate_arguments() {
            let text = format!(
                "tool call arguments are not valid JSON: {}, ToolCallID: {}, error: {}",
                call.name, call.id, err
            );
            tracing::warn!(target: "txing.agent", tool = %call.name, tool_call_id = %call.id, error = %err, "malformed tool arguments");
            return AgentMessage::tool(call.id.clone(), call.name.clone(), text);
        }
    }
    AgentMessage::tool(
        "",
        "",
        "tool call arguments are invalid, check that they are valid JSON",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::Role;
    use crate::llm::mock_provider::{CollectingHook, MockFailure, MockToolModel, MockTurn};
    use crate::tools::{FnTool, ToolRegistry};
    use serde_json::json;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new(
            ToolDefinition {
                name: "web_search_tool".to_string(),
                description: "search".to_string(),
                parameters: json!({"type": "object"}),
            },
            |_| async { Ok(r#"[{"url":"a"},{"url":"b"}]"#.to_string()) },
        )));
        registry.register(Arc::new(FnTool::new(
            ToolDefinition {
                name: "get_weather".to_string(),
                description: "weather".to_string(),
                parameters: json!({"type": "object"}),
            },
            |_| async { Ok("sunny".to_string()) },
        )));
        ToolExecutor::new(Arc::new(registry))
    }

    fn agent(model: MockToolModel) -> ToolCallAgent {
        ToolCallAgent::new(Arc::new(model), "deepseek-v3", executor())
    }

    // ===== Run Tests =====

    #[tokio::test]
    async fn test_plain_answer() {
        let model = MockToolModel::new(vec![MockTurn::text("Hello")]);
        let hook = CollectingHook::new();
        let run = agent(model.clone()).run(&CancellationToken::new(), "hi", &hook).await.unwrap();

        assert_eq!(run.answer, "Hello");
        assert_eq!(run.steps, 1);
        assert!(!run.step_limit_reached);
        assert_eq!(hook.content(), "Hello");

        let request = &model.recorded_requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "hi");
        assert_eq!(request.max_tokens, Some(8192));
        assert_eq!(request.tools.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_round_trip_order() {
        let model = MockToolModel::new(vec![
            MockTurn::tool_calls(vec![ToolCall::new("c1", "web_search_tool", r#"{"query":"rust"}"#)]),
            MockTurn::text("Found it"),
        ]);
        let hook = CollectingHook::new();
        let run = agent(model.clone()).run(&CancellationToken::new(), "search", &hook).await.unwrap();

        let chunks = hook.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].tool_params, r#"{"query":"rust"}"#);
        assert_eq!(chunks[0].show_msg, "Web search: rust");
        assert_eq!(chunks[1].tool_result, r#"[{"url":"a"},{"url":"b"}]"#);
        assert_eq!(chunks[1].show_msg, "Found 2 related pages");
        assert_eq!(chunks[2].content, "Found it");

        // system, user, assistant(call), tool, assistant
        assert_eq!(run.messages.len(), 5);
        assert_eq!(run.messages[3].role, Role::Tool);
        assert_eq!(run.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(model.recorded_requests()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_fallback_show_messages() {
        let model = MockToolModel::new(vec![
            MockTurn::tool_calls(vec![ToolCall::new("w", "get_weather", "{}")]),
            MockTurn::text("ok"),
        ]);
        let hook = CollectingHook::new();
        agent(model).run(&CancellationToken::new(), "weather?", &hook).await.unwrap();

        let chunks = hook.chunks();
        assert_eq!(chunks[0].show_msg, "Calling tool: get_weather");
        assert_eq!(chunks[1].show_msg, "Tool call finished: sunny");
    }

    #[tokio::test]
    async fn test_malformed_arguments_single_synthetic_message() {
        let model = MockToolModel::new(vec![
            MockTurn::tool_calls(vec![
                ToolCall::new("ok", "get_weather", "{}"),
                ToolCall::new("bad", "web_search_tool", "{not json"),
            ]),
            MockTurn::text("sorry"),
        ]);
        let hook = CollectingHook::new();
        let run = agent(model).run(&CancellationToken::new(), "go", &hook).await.unwrap();

        let tool_messages: Vec<&AgentMessage> =
            run.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("bad"));
        assert!(tool_messages[0]
            .content
            .starts_with("tool call arguments are not valid JSON: web_search_tool, ToolCallID: bad, error:"));
        assert_eq!(run.answer, "sorry");

        // no tool ran, so no request summaries
        assert!(hook.chunks().iter().all(|c| c.tool_params.is_empty()));
    }

    #[tokio::test]
    async fn test_step_limit_terminates() {
        let model = MockToolModel::new(vec![MockTurn::tool_calls(vec![ToolCall::new(
            "loop",
            "get_weather",
            "{}",
        )])]);
        let hook = CollectingHook::new();
        let run = agent(model.clone())
            .with_max_steps(4)
            .run(&CancellationToken::new(), "forever", &hook)
            .await
            .unwrap();

        assert!(run.step_limit_reached);
        assert_eq!(run.steps, 4);
        assert_eq!(model.call_count(), 4);
        assert_eq!(run.answer, "");
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = MockToolModel::new(vec![MockTurn::Fail(MockFailure::server(500, "boom"))]);
        let err = agent(model)
            .run(&CancellationToken::new(), "hi", &CollectingHook::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TxingError::Api(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_model_blocked() {
        let model = MockToolModel::new(vec![MockTurn::WaitForCancel]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            agent(model).run(&cancel, "hi", &CollectingHook::new()),
        )
        .await
        .expect("run should end promptly");
        assert!(matches!(result, Err(TxingError::Cancelled)));
    }

    #[tokio::test]
    async fn test_hook_error_aborts() {
        let model = MockToolModel::new(vec![
            MockTurn::tool_calls(vec![ToolCall::new("c", "get_weather", "{}")]),
            MockTurn::text("never"),
        ]);
        let hook = CollectingHook::failing_after(1);
        let err = agent(model.clone())
            .run(&CancellationToken::new(), "hi", &hook)
            .await
            .unwrap_err();
        assert!(matches!(err, TxingError::Delivery(_)));
        assert_eq!(model.call_count(), 1);
    }
}
