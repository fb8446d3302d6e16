// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool-calling agent
//!
//! The agent alternates between asking the model and running the tools it
//! requests until the model answers without tool calls or the step ceiling
//! is hit.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use txing::agent::AgentFactory;
//!
//! let factory = AgentFactory::new(dispatcher, tools, settings.agent.clone(), "deepseek-v3");
//! let agent = factory.create(Some("toolcall"))?;
//! let run = agent.run(&cancel, "What's the weather in Paris?", &hook).await?;
//! println!("{}", run.answer);
//! ```

pub mod factory;
pub mod runner;
pub mod state;

pub use factory::{AgentFactory, AgentKind, GENERAL_AGENT, TOOLCALL_AGENT};
pub use runner::{AgentRun, ToolCallAgent};
pub use state::{transition, AgentAction, AgentEvent, AgentState, ModelReply};
