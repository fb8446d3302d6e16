// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! txing - streaming LLM chat gateway.
//!
//! This crate exposes the runtime used by:
//! - the `txing` CLI (`src/main.rs`)
//! - embedded JSONL mode driven by a host process over stdin/stdout
//!
//! Architecture highlights:
//! - `channel`: channel catalog, conditional model mapping, channel selection
//! - `llm`: adapter traits, the adapter registry and provider implementations
//! - `chat`: conversations, dispatch with retry, the per-turn streaming pipeline
//!   and the client connection
//! - `agent`: the tool-calling state machine and its runner
//! - `tools`: tool registry, sequential executor and show-message builders
//! - `embedded`, `cli`: transports and the command-line surface

pub mod agent;
pub mod channel;
pub mod chat;
pub mod cli;
pub mod config;
pub mod embedded;
pub mod error;
pub mod llm;
pub mod tools;

pub use error::{Result, TxingError};
