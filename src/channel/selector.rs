// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Channel selection
//!
//! Picks uniformly at random among enabled channels that list the model and
//! resolve a mapping target for the request's parameters. `priority` and
//! `weight` are not consulted.

use std::sync::Arc;

use rand::seq::IndexedRandom;

use crate::error::{Result, TxingError};

use super::{Channel, ChannelConfig, ChannelStore, MappingParams};

/// A channel chosen for a request, with the model name to send upstream
#[derive(Debug, Clone)]
pub struct Selection {
    pub channel: Channel,
    pub target_model: String,
}

/// Resolves a logical model to a channel and provider model
#[derive(Clone)]
pub struct ChannelSelector {
    store: Arc<dyn ChannelStore>,
}

impl ChannelSelector {
    pub fn new(store: Arc<dyn ChannelStore>) -> Self {
        Self { store }
    }

    /// Every eligible channel for `model` under `params`, with its target.
    pub fn eligible(&self, model: &str, params: &MappingParams) -> Result<Vec<Selection>> {
        let candidates = self.store.enabled_channels_for_model(model)?;
        if candidates.is_empty() {
            tracing::warn!(target: "txing.channel.selector", model, "no enabled channel lists model");
            return Err(TxingError::NoChannelForModel(model.to_string()));
        }

        Ok(candidates
            .into_iter()
            .filter_map(|channel| {
                let target = channel.mapping_model(model, params)?;
                if target.is_empty() {
                    return None;
                }
                Some(Selection {
                    channel,
                    target_model: target,
                })
            })
            .collect())
    }

    /// Choose a channel for `model` and return it with its resolved target.
    pub fn choose_channel_and_model(
        &self,
        model: &str,
        params: &MappingParams,
    ) -> Result<Selection> {
        let eligible = self.eligible(model, params)?;

        let chosen = eligible.choose(&mut rand::rng()).cloned().ok_or_else(|| {
            tracing::warn!(
                target: "txing.channel.selector",
                model,
                ?params,
                "mapping rejected every candidate channel"
            );
            TxingError::NoChannelForModel(model.to_string())
        })?;

        tracing::debug!(
            target: "txing.channel.selector",
            model,
            channel_id = chosen.channel.id,
            channel_type = %chosen.channel.channel_type,
            target_model = %chosen.target_model,
            candidates = eligible.len(),
            "channel selected"
        );

        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::store::MockChannelStore;
    use crate::channel::{
        InMemoryChannelStore, ModelMapping, ModelMappingCondition, CHANNEL_TYPE_POLO,
        PARAM_ENABLE_WEB, PARAM_TYPE,
    };
    use serde_json::json;
    use std::collections::HashSet;

    fn web_only_channel(id: i64) -> Channel {
        Channel::new(id, CHANNEL_TYPE_POLO)
            .with_models(["deepseek-v3"])
            .with_mapping(ModelMapping {
                source_model: "deepseek-v3".to_string(),
                conditions: vec![ModelMappingCondition {
                    target_model: "deepseek-v3-web".to_string(),
                    conditions: [(PARAM_ENABLE_WEB.to_string(), json!(true))]
                        .into_iter()
                        .collect(),
                }],
            })
    }

    fn selector(channels: Vec<Channel>) -> ChannelSelector {
        ChannelSelector::new(Arc::new(InMemoryChannelStore::new(channels)))
    }

    #[test]
    fn test_single_channel_no_mapping() {
        let selector = selector(vec![Channel::new(1, CHANNEL_TYPE_POLO).with_models(["deepseek-v3"])]);
        let selection = selector
            .choose_channel_and_model("deepseek-v3", &MappingParams::new())
            .unwrap();
        assert_eq!(selection.channel.id, 1);
        assert_eq!(selection.target_model, "deepseek-v3");
    }

    #[test]
    fn test_no_channel_for_model() {
        let selector = selector(vec![Channel::new(1, CHANNEL_TYPE_POLO).with_models(["qwen"])]);
        let err = selector
            .choose_channel_and_model("deepseek-v3", &MappingParams::new())
            .unwrap_err();
        assert!(matches!(err, TxingError::NoChannelForModel(m) if m == "deepseek-v3"));
    }

    #[test]
    fn test_mapping_rejects_all_candidates() {
        let selector = selector(vec![Channel::new(1, CHANNEL_TYPE_POLO).with_models(["deepseek-v3"])]);
        let params: MappingParams = [(PARAM_ENABLE_WEB.to_string(), json!(true))]
            .into_iter()
            .collect();
        let err = selector
            .choose_channel_and_model("deepseek-v3", &params)
            .unwrap_err();
        assert!(matches!(err, TxingError::NoChannelForModel(_)));
    }

    #[test]
    fn test_membership_necessary_not_sufficient() {
        let plain = Channel::new(1, CHANNEL_TYPE_POLO).with_models(["deepseek-v3"]);
        let selector = selector(vec![plain, web_only_channel(2)]);
        let params: MappingParams = [(PARAM_ENABLE_WEB.to_string(), json!(true))]
            .into_iter()
            .collect();

        for _ in 0..20 {
            let selection = selector.choose_channel_and_model("deepseek-v3", &params).unwrap();
            assert_eq!(selection.channel.id, 2);
            assert_eq!(selection.target_model, "deepseek-v3-web");
        }
    }

    #[test]
    fn test_app_type_rejected_by_web_rule() {
        let selector = selector(vec![web_only_channel(2)]);
        let params: MappingParams = [
            (PARAM_ENABLE_WEB.to_string(), json!(true)),
            (PARAM_TYPE.to_string(), json!("app")),
        ]
        .into_iter()
        .collect();
        assert!(selector.choose_channel_and_model("deepseek-v3", &params).is_err());
    }

    #[test]
    fn test_uniform_choice_reaches_every_channel() {
        let channels = (1..=3)
            .map(|id| Channel::new(id, CHANNEL_TYPE_POLO).with_models(["m"]))
            .collect();
        let selector = selector(channels);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let selection = selector.choose_channel_and_model("m", &MappingParams::new()).unwrap();
            seen.insert(selection.channel.id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_store_error_propagates() {
        let mut store = MockChannelStore::new();
        store
            .expect_enabled_channels_for_model()
            .returning(|_| Err(TxingError::Config("database down".to_string())));

        let selector = ChannelSelector::new(Arc::new(store));
        let err = selector
            .choose_channel_and_model("m", &MappingParams::new())
            .unwrap_err();
        assert!(err.to_string().contains("database down"));
    }

    #[test]
    fn test_store_queried_once_per_selection() {
        let mut store = MockChannelStore::new();
        store
            .expect_enabled_channels_for_model()
            .times(1)
            .returning(|_| Ok(vec![Channel::new(4, CHANNEL_TYPE_POLO).with_models(["deepseek-v3"])]));

        let selector = ChannelSelector::new(Arc::new(store));
        let selection = selector
            .choose_channel_and_model("deepseek-v3", &MappingParams::new())
            .unwrap();
        assert_eq!(selection.channel.id, 4);
    }
}
