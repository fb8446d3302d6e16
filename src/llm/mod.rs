// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider adapters
//!
//! Message and chunk types, the adapter traits, the OpenAI-compatible
//! provider implementations and the registry that picks one per channel
//! type.

pub mod chat_config;
pub mod chunk;
pub mod factory;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod providers;
pub mod retry;

pub use chat_config::ChatConfig;
pub use chunk::{Chunk, FnHook, Hook};
pub use factory::{AdapterRegistry, RequesterCache};
pub use message::*;
pub use provider::*;
