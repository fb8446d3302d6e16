// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent state machine
//!
//! ```text
//! Start -> Model -> End
//!            |  ^
//!            v  |
//!          Tools / ToolArgError
//! ```

use std::fmt;

use crate::error::{Result, TxingError};
use crate::llm::message::AgentMessage;

/// Where the agent is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Start,
    Model,
    Tools,
    ToolArgError,
    End,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Start => "start",
            AgentState::Model => "model",
            AgentState::Tools => "tools",
            AgentState::ToolArgError => "tool_arg_error",
            AgentState::End => "end",
        };
        f.write_str(name)
    }
}

/// Shape of a model reply, as far as routing cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelReply {
    /// No tool calls: the conversation is complete
    Final,
    /// Tool calls with well-formed arguments
    ToolCalls,
    /// At least one tool call whose arguments are not a JSON object
    MalformedArguments,
}

impl ModelReply {
    pub fn classify(message: &AgentMessage) -> Self {
        if !message.has_tool_calls() {
            ModelReply::Final
        } else if message.tool_calls.iter().any(|c| c.validate_arguments().is_err()) {
            ModelReply::MalformedArguments
        } else {
            ModelReply::ToolCalls
        }
    }
}

/// What just happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// The prompt is in the history
    Started,
    ModelReplied(ModelReply),
    /// The step budget ran out before another model call
    StepLimitReached,
    ToolsFinished,
    ArgErrorRecorded,
}

/// What the runner must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    CallModel,
    RunTools,
    RecordArgError,
    Finish,
}

/// Pure transition function. Pairs outside the graph are an error.
pub fn transition(state: AgentState, event: AgentEvent) -> Result<(AgentState, AgentAction)> {
    use AgentAction::*;
    use AgentEvent::*;
    use AgentState::*;

    let next = match (state, event) {
        (Start, Started) => (Model, CallModel),
        (Model, ModelReplied(ModelReply::Final)) => (End, Finish),
        (Model, ModelReplied(ModelReply::ToolCalls)) => (Tools, RunTools),
        (Model, ModelReplied(ModelReply::MalformedArguments)) => (ToolArgError, RecordArgError),
        (Model, StepLimitReached) => (End, Finish),
        (Tools, ToolsFinished) => (Model, CallModel),
        (ToolArgError, ArgErrorRecorded) => (Model, CallModel),
        (state, event) => {
            return Err(TxingError::Agent(format!(
                "no transition from {} on {:?}",
                state, event
            )))
        }
    };
    Ok(next)
}
