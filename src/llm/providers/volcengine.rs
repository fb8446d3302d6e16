// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Volcengine Ark channels

use crate::channel::CHANNEL_TYPE_VOLCENGINE;
use crate::config::HttpConfig;

use super::compat::{AuthScheme, CompatFactory, Dialect, ParamPolicy};

pub const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// Ark rejects `top_k`; everything else is forwarded.
pub static VOLCENGINE: Dialect = Dialect {
    channel_type: CHANNEL_TYPE_VOLCENGINE,
    default_base_url: Some(ARK_BASE_URL),
    auth: AuthScheme::Bearer,
    params: ParamPolicy::AllButTopK,
    accept_json: false,
    lenient_frames: false,
};

pub fn volcengine_factory(http: HttpConfig) -> CompatFactory {
    CompatFactory::new(&VOLCENGINE, http)
}
