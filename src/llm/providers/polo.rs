// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Polo aggregator channels
//!
//! Polo takes the raw key behind an `sk-` prefix, wants an explicit JSON
//! `Accept`, and receives every sampling parameter. Its stream sometimes
//! splits one JSON payload over several `data:` lines, so frames are decoded
//! leniently.

use crate::channel::CHANNEL_TYPE_POLO;
use crate::config::HttpConfig;

use super::compat::{AuthScheme, CompatFactory, Dialect, ParamPolicy};

pub static POLO: Dialect = Dialect {
    channel_type: CHANNEL_TYPE_POLO,
    default_base_url: None,
    auth: AuthScheme::SkPrefix,
    params: ParamPolicy::All,
    accept_json: true,
    lenient_frames: true,
};

pub fn polo_factory(http: HttpConfig) -> CompatFactory {
    CompatFactory::new(&POLO, http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::llm::provider::ChatRequesterFactory;

    #[test]
    fn test_polo_needs_endpoint() {
        let factory = polo_factory(HttpConfig::default());
        let bare = Channel::new(1, CHANNEL_TYPE_POLO).with_secret("abc");
        assert!(factory.create_chat_requester(&bare).is_err());

        let configured = bare.with_endpoint("https://polo.example.com/v1");
        assert!(factory.create_chat_requester(&configured).is_ok());
    }

    #[test]
    fn test_polo_dialect() {
        assert_eq!(POLO.auth, AuthScheme::SkPrefix);
        assert_eq!(POLO.params, ParamPolicy::All);
        assert!(POLO.accept_json);
        assert!(POLO.lenient_frames);
    }
}
