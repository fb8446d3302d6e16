// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use txing::channel::{
    ChannelCatalog, ChannelSelector, InMemoryChannelStore, MappingParams, PARAM_ENABLE_WEB,
};
use txing::config::{ConcurrentTurnPolicy, Settings};
use txing::TxingError;

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ===== Settings Tests =====

#[test]
fn test_partial_settings_keep_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "settings.json",
        r#"{"gateway": {"concurrent_turn_policy": "reject", "inbound_queue_capacity": 3}}"#,
    );

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.gateway.concurrent_turn_policy, ConcurrentTurnPolicy::Reject);
    assert_eq!(settings.gateway.inbound_queue_capacity, 3);
    assert_eq!(settings.gateway.relay_capacity, 20);
    assert_eq!(settings.gateway.agent_model, "deepseek-v3");
    assert_eq!(settings.agent.max_steps, 500);
    assert_eq!(settings.agent.max_tokens, 8192);
    assert_eq!(settings.logging.level, "warn");
}

#[test]
fn test_settings_round_trip_through_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("home").join("settings.json");

    let mut settings = Settings::default();
    settings.gateway.default_model = "qwen-plus".to_string();
    settings.resilience.max_retries = 1;
    settings.save_to(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.gateway.default_model, "qwen-plus");
    assert_eq!(loaded.resilience.max_retries, 1);
    assert!(loaded.channels_file.is_none());
}

// ===== Channel Catalog Tests =====

const JSON_CATALOG: &str = r#"{
  "channels": [
    {
      "id": 1,
      "type": "polo",
      "models": ["deepseek-v3"],
      "secret": "k1\nk2",
      "mappings": [
        {
          "source_model": "deepseek-v3",
          "conditions": [
            {"target_model": "deepseek-v3-web", "conditions": {"enableWeb": true}}
          ]
        }
      ]
    }
  ]
}"#;

const YAML_CATALOG: &str = r#"
channels:
  - id: 1
    type: polo
    models: [deepseek-v3]
    secret: "k1\nk2"
    mappings:
      - source_model: deepseek-v3
        conditions:
          - target_model: deepseek-v3-web
            conditions:
              enableWeb: true
"#;

const TOML_CATALOG: &str = r#"
[[channels]]
id = 1
type = "polo"
models = ["deepseek-v3"]
secret = "k1\nk2"

[[channels.mappings]]
source_model = "deepseek-v3"

[[channels.mappings.conditions]]
target_model = "deepseek-v3-web"
conditions = { enableWeb = true }
"#;

#[test]
fn test_catalog_formats_agree() {
    let dir = TempDir::new().unwrap();
    let from_json = ChannelCatalog::load_from(&write(&dir, "c.json", JSON_CATALOG)).unwrap();
    let from_yaml = ChannelCatalog::load_from(&write(&dir, "c.yaml", YAML_CATALOG)).unwrap();
    let from_toml = ChannelCatalog::load_from(&write(&dir, "c.toml", TOML_CATALOG)).unwrap();

    assert_eq!(from_json.channels, from_yaml.channels);
    assert_eq!(from_json.channels, from_toml.channels);

    let channel = &from_json.channels[0];
    assert_eq!(channel.retry, 3);
    assert!(channel.status);
    assert_eq!(channel.secrets(), vec!["k1", "k2"]);
}

#[test]
fn test_catalog_unknown_extension_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "channels.ini", "[channels]");
    let err = ChannelCatalog::load_from(&path).unwrap_err();
    assert!(matches!(err, TxingError::Config(_)));
}

#[test]
fn test_catalog_bad_yaml_is_yaml_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "channels.yml", "channels: [\n  - id: one");
    let err = ChannelCatalog::load_from(&path).unwrap_err();
    assert!(matches!(err, TxingError::Yaml(_)));
}

#[test]
fn test_loaded_catalog_drives_selection() {
    let dir = TempDir::new().unwrap();
    let catalog = ChannelCatalog::load_from(&write(&dir, "c.json", JSON_CATALOG)).unwrap();
    let selector = ChannelSelector::new(Arc::new(InMemoryChannelStore::from_catalog(catalog)));

    let mut params = MappingParams::new();
    params.insert(PARAM_ENABLE_WEB.to_string(), Value::Bool(true));
    let web = selector.choose_channel_and_model("deepseek-v3", &params).unwrap();
    assert_eq!(web.target_model, "deepseek-v3-web");

    params.insert(PARAM_ENABLE_WEB.to_string(), json!(false));
    let plain = selector.choose_channel_and_model("deepseek-v3", &params).unwrap();
    assert_eq!(plain.target_model, "deepseek-v3");

    let err = selector
        .choose_channel_and_model("gpt-4o", &MappingParams::new())
        .unwrap_err();
    assert!(matches!(err, TxingError::NoChannelForModel(_)));
}
