// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration module for txing
//!
//! Settings are read from `~/.txing/settings.json` (or `$TXING_HOME`); every
//! field has a default so a partial file is enough.

pub mod settings;

pub use settings::*;
