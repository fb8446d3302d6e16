// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider adapters, one per channel type

pub(crate) mod common;
pub mod compat;
pub mod openai;
pub mod polo;
pub mod volcengine;

pub use compat::{AuthScheme, CompatClient, CompatFactory, Dialect, ParamPolicy};
pub use openai::{eino_openai_factory, openai_factory};
pub use polo::polo_factory;
pub use volcengine::volcengine_factory;
