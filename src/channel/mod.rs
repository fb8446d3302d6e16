// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Channels and conditional model mapping
//!
//! A [`Channel`] is one configured upstream target: a provider type, a
//! credential pool, an endpoint and the logical models it serves. Mapping
//! rules translate a logical model into the provider's model name depending
//! on request context (for example whether web search is enabled).
//!
//! Resolution treats every context key a condition does not check as "must
//! equal its declared default", so a narrow rule such as `enableWeb = true`
//! never matches a request that also sets some other non-default parameter.

pub mod selector;
pub mod store;

use std::collections::BTreeMap;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TxingError};

pub use selector::{ChannelSelector, Selection};
pub use store::{ChannelCatalog, ChannelStore, InMemoryChannelStore};

/// Context parameters mapping conditions are evaluated against
pub type MappingParams = BTreeMap<String, Value>;

/// Condition key: web search requested
pub const PARAM_ENABLE_WEB: &str = "enableWeb";
/// Condition key: kind of LLM surface ("model" or "app")
pub const PARAM_TYPE: &str = "type";

pub const LLM_TYPE_MODEL: &str = "model";
pub const LLM_TYPE_APP: &str = "app";

/// Channel-type keys registered by default
pub const CHANNEL_TYPE_OPENAI: &str = "OpenAI";
pub const CHANNEL_TYPE_EINO_OPENAI: &str = "Eino OpenAI";
pub const CHANNEL_TYPE_POLO: &str = "polo";
pub const CHANNEL_TYPE_VOLCENGINE: &str = "volcengine";

/// Declared default for a condition key, if it has one.
pub fn condition_default(key: &str) -> Option<Value> {
    match key {
        PARAM_ENABLE_WEB => Some(Value::Bool(false)),
        PARAM_TYPE => Some(Value::String(LLM_TYPE_MODEL.to_string())),
        _ => None,
    }
}

/// Equality used by condition checks. Numbers compare by value so `1` and
/// `1.0` are the same.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// What a channel exposes to the selector and the adapter factories.
pub trait ChannelConfig: Send + Sync {
    fn id(&self) -> i64;
    fn channel_type(&self) -> &str;
    fn retry(&self) -> u32;
    fn endpoint(&self) -> &str;

    /// One credential from the pool, chosen uniformly at random.
    fn random_secret(&self) -> Result<String>;

    /// Target model for `model` under `params`, or `None` when this channel
    /// cannot serve the request.
    fn mapping_model(&self, model: &str, params: &MappingParams) -> Option<String>;
}

/// One conditional target of a mapping rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMappingCondition {
    pub target_model: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
}

/// Rules for one source model, tried in order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMapping {
    pub source_model: String,
    #[serde(default)]
    pub conditions: Vec<ModelMappingCondition>,
}

impl ModelMappingCondition {
    /// Explicit keys must be present and equal; every other context key must
    /// have a declared default and equal it.
    pub fn matches(&self, params: &MappingParams) -> bool {
        let explicit_ok = self.conditions.iter().all(|(key, expected)| {
            params
                .get(key)
                .is_some_and(|actual| values_equal(actual, expected))
        });
        if !explicit_ok {
            return false;
        }

        params
            .iter()
            .filter(|(key, _)| !self.conditions.contains_key(*key))
            .all(|(key, actual)| {
                condition_default(key).is_some_and(|default| values_equal(actual, &default))
            })
    }
}

/// Resolve `model` against `mappings`.
///
/// The first satisfied condition wins. With no match the model maps to
/// itself, unless some parameter with a declared default deviates from it,
/// in which case there is no valid target.
pub fn resolve_mapping(
    mappings: &[ModelMapping],
    model: &str,
    params: &MappingParams,
) -> Option<String> {
    let hit = mappings
        .iter()
        .filter(|mapping| mapping.source_model == model)
        .flat_map(|mapping| mapping.conditions.iter())
        .find(|condition| condition.matches(params));

    if let Some(condition) = hit {
        return Some(condition.target_model.clone());
    }

    let all_default = params.iter().all(|(key, actual)| match condition_default(key) {
        Some(default) => values_equal(actual, &default),
        None => true,
    });

    all_default.then(|| model.to_string())
}

/// A configured upstream credential/target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    /// Provider key, e.g. "polo" or "OpenAI"
    #[serde(rename = "type")]
    pub channel_type: String,

    /// Stored but not used by selection
    #[serde(default)]
    pub priority: i32,

    /// Stored but not used by selection
    #[serde(default)]
    pub weight: i32,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Newline-delimited credential pool
    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub endpoint: String,

    /// Enabled flag
    #[serde(default = "default_status")]
    pub status: bool,

    #[serde(default)]
    pub mappings: Vec<ModelMapping>,
}

fn default_retry() -> u32 {
    3
}

fn default_status() -> bool {
    true
}

impl Channel {
    pub fn new(id: i64, channel_type: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            channel_type: channel_type.into(),
            priority: 0,
            weight: 0,
            models: Vec::new(),
            retry: default_retry(),
            secret: String::new(),
            endpoint: String::new(),
            status: default_status(),
            mappings: Vec::new(),
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_status(mut self, enabled: bool) -> Self {
        self.status = enabled;
        self
    }

    pub fn with_mapping(mut self, mapping: ModelMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Non-empty entries of the credential pool
    pub fn secrets(&self) -> Vec<&str> {
        self.secret
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl ChannelConfig for Channel {
    fn id(&self) -> i64 {
        self.id
    }

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn retry(&self) -> u32 {
        self.retry
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn random_secret(&self) -> Result<String> {
        self.secrets()
            .choose(&mut rand::rng())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                TxingError::Config(format!("channel #{} has no credentials", self.id))
            })
    }

    fn mapping_model(&self, model: &str, params: &MappingParams) -> Option<String> {
        resolve_mapping(&self.mappings, model, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> MappingParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn web_mapping() -> ModelMapping {
        ModelMapping {
            source_model: "deepseek-v3".to_string(),
            conditions: vec![ModelMappingCondition {
                target_model: "bot-web-search".to_string(),
                conditions: [(PARAM_ENABLE_WEB.to_string(), json!(true))]
                    .into_iter()
                    .collect(),
            }],
        }
    }

    // ===== Resolution Tests =====

    #[test]
    fn test_no_rules_default_params_maps_to_self() {
        let target = resolve_mapping(&[], "deepseek-v3", &params(&[]));
        assert_eq!(target.as_deref(), Some("deepseek-v3"));

        let target = resolve_mapping(
            &[],
            "deepseek-v3",
            &params(&[(PARAM_ENABLE_WEB, json!(false)), (PARAM_TYPE, json!("model"))]),
        );
        assert_eq!(target.as_deref(), Some("deepseek-v3"));
    }

    #[test]
    fn test_no_rules_non_default_param_rejects() {
        let target = resolve_mapping(&[], "deepseek-v3", &params(&[(PARAM_ENABLE_WEB, json!(true))]));
        assert!(target.is_none());
    }

    #[test]
    fn test_explicit_condition_matches() {
        let target = resolve_mapping(
            &[web_mapping()],
            "deepseek-v3",
            &params(&[(PARAM_ENABLE_WEB, json!(true))]),
        );
        assert_eq!(target.as_deref(), Some("bot-web-search"));
    }

    #[test]
    fn test_unchecked_key_must_be_default() {
        let mappings = [web_mapping()];

        let rejected = resolve_mapping(
            &mappings,
            "deepseek-v3",
            &params(&[(PARAM_ENABLE_WEB, json!(true)), (PARAM_TYPE, json!("app"))]),
        );
        assert!(rejected.is_none());

        let accepted = resolve_mapping(
            &mappings,
            "deepseek-v3",
            &params(&[(PARAM_ENABLE_WEB, json!(true)), (PARAM_TYPE, json!("model"))]),
        );
        assert_eq!(accepted.as_deref(), Some("bot-web-search"));
    }

    #[test]
    fn test_unchecked_key_without_default_blocks_condition_only() {
        let mappings = [web_mapping()];

        // the self-mapping fallback ignores keys without defaults
        let with_unknown = params(&[(PARAM_ENABLE_WEB, json!(false)), ("region", json!("eu"))]);
        assert_eq!(
            resolve_mapping(&mappings, "deepseek-v3", &with_unknown).as_deref(),
            Some("deepseek-v3")
        );

        // a condition rejects them: "region" has no default to compare with
        let web_and_unknown = params(&[(PARAM_ENABLE_WEB, json!(true)), ("region", json!("eu"))]);
        assert!(resolve_mapping(&mappings, "deepseek-v3", &web_and_unknown).is_none());
    }

    #[test]
    fn test_explicit_key_missing_from_params() {
        let target = resolve_mapping(&[web_mapping()], "deepseek-v3", &params(&[]));
        // falls through to self mapping because nothing deviates from defaults
        assert_eq!(target.as_deref(), Some("deepseek-v3"));
    }

    #[test]
    fn test_rules_for_other_models_ignored() {
        let target = resolve_mapping(
            &[web_mapping()],
            "qwen-max",
            &params(&[(PARAM_ENABLE_WEB, json!(true))]),
        );
        assert!(target.is_none());
    }

    #[test]
    fn test_first_condition_wins() {
        let mapping = ModelMapping {
            source_model: "m".to_string(),
            conditions: vec![
                ModelMappingCondition {
                    target_model: "first".to_string(),
                    conditions: [(PARAM_TYPE.to_string(), json!("app"))].into_iter().collect(),
                },
                ModelMappingCondition {
                    target_model: "second".to_string(),
                    conditions: [(PARAM_TYPE.to_string(), json!("app"))].into_iter().collect(),
                },
            ],
        };
        let target = resolve_mapping(&[mapping], "m", &params(&[(PARAM_TYPE, json!("app"))]));
        assert_eq!(target.as_deref(), Some("first"));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    // ===== Channel Tests =====

    #[test]
    fn test_channel_deserialize_defaults() {
        let channel: Channel = serde_json::from_value(json!({
            "id": 1,
            "type": "polo",
            "models": ["deepseek-v3"],
            "secret": "k1\n\n  k2  \n",
            "endpoint": "https://api.example.com/v1"
        }))
        .unwrap();

        assert_eq!(channel.retry, 3);
        assert!(channel.status);
        assert!(channel.supports_model("deepseek-v3"));
        assert_eq!(channel.secrets(), vec!["k1", "k2"]);
    }

    #[test]
    fn test_random_secret_from_pool() {
        let channel = Channel::new(1, CHANNEL_TYPE_POLO).with_secret("a\nb\nc");
        for _ in 0..20 {
            let secret = channel.random_secret().unwrap();
            assert!(["a", "b", "c"].contains(&secret.as_str()));
        }
    }

    #[test]
    fn test_random_secret_empty_pool_errors() {
        let channel = Channel::new(9, CHANNEL_TYPE_POLO).with_secret("\n  \n");
        let err = channel.random_secret().unwrap_err();
        assert!(err.to_string().contains("#9"));
    }

    // ===== Property Tests =====

    fn arb_params() -> impl Strategy<Value = MappingParams> {
        (
            proptest::option::of(any::<bool>()),
            proptest::option::of(prop_oneof![Just("model"), Just("app")]),
        )
            .prop_map(|(web, kind)| {
                let mut p = MappingParams::new();
                if let Some(web) = web {
                    p.insert(PARAM_ENABLE_WEB.to_string(), json!(web));
                }
                if let Some(kind) = kind {
                    p.insert(PARAM_TYPE.to_string(), json!(kind));
                }
                p
            })
    }

    proptest! {
        #[test]
        fn prop_resolution_is_deterministic(p in arb_params()) {
            let mappings = [web_mapping()];
            let first = resolve_mapping(&mappings, "deepseek-v3", &p);
            let second = resolve_mapping(&mappings, "deepseek-v3", &p);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_web_rule_never_matches_app_type(web in any::<bool>()) {
            let p = params(&[(PARAM_ENABLE_WEB, json!(web)), (PARAM_TYPE, json!("app"))]);
            prop_assert!(resolve_mapping(&[web_mapping()], "deepseek-v3", &p).is_none());
        }
    }
}
