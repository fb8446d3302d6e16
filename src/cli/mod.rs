// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI module for txing
//!
//! Argument parsing and the runtime wiring the subcommands share.

pub mod args;
pub mod runtime;

pub use args::*;
pub use runtime::{ChannelRow, Runtime};
