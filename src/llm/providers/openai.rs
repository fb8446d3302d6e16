// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI and Eino OpenAI channels
//!
//! Both use bearer auth and forward only the core sampling parameters.

use crate::channel::{CHANNEL_TYPE_EINO_OPENAI, CHANNEL_TYPE_OPENAI};
use crate::config::HttpConfig;

use super::compat::{AuthScheme, CompatFactory, Dialect, ParamPolicy};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub static OPENAI: Dialect = Dialect {
    channel_type: CHANNEL_TYPE_OPENAI,
    default_base_url: Some(OPENAI_BASE_URL),
    auth: AuthScheme::Bearer,
    params: ParamPolicy::Core,
    accept_json: false,
    lenient_frames: false,
};

pub static EINO_OPENAI: Dialect = Dialect {
    channel_type: CHANNEL_TYPE_EINO_OPENAI,
    default_base_url: Some(OPENAI_BASE_URL),
    auth: AuthScheme::Bearer,
    params: ParamPolicy::Core,
    accept_json: false,
    lenient_frames: false,
};

pub fn openai_factory(http: HttpConfig) -> CompatFactory {
    CompatFactory::new(&OPENAI, http)
}

pub fn eino_openai_factory(http: HttpConfig) -> CompatFactory {
    CompatFactory::new(&EINO_OPENAI, http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::llm::provider::ChatRequesterFactory;

    #[test]
    fn test_factories_serve_their_types() {
        assert_eq!(openai_factory(HttpConfig::default()).channel_type(), "OpenAI");
        assert_eq!(
            eino_openai_factory(HttpConfig::default()).channel_type(),
            "Eino OpenAI"
        );
    }

    #[test]
    fn test_openai_without_endpoint_uses_public_api() {
        let factory = openai_factory(HttpConfig::default());
        let channel = Channel::new(1, CHANNEL_TYPE_OPENAI).with_secret("sk-test");
        assert!(factory.create_chat_requester(&channel).is_ok());
    }

    #[test]
    fn test_core_params_only() {
        assert_eq!(OPENAI.params, ParamPolicy::Core);
        assert_eq!(EINO_OPENAI.auth, AuthScheme::Bearer);
    }
}
