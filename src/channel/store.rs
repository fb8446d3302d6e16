// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Channel persistence boundary and the in-memory catalog.

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TxingError};

use super::Channel;

/// Read access to configured channels.
///
/// Implementations are read per request; nothing above this layer caches
/// channel records.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelStore: Send + Sync {
    /// Enabled channels whose model list contains `model`
    fn enabled_channels_for_model(&self, model: &str) -> Result<Vec<Channel>>;

    /// Every channel, enabled or not
    fn all_channels(&self) -> Result<Vec<Channel>>;
}

/// On-disk catalog shape (`{"channels": [...]}` / `[[channels]]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelCatalog {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl ChannelCatalog {
    /// Load a catalog, picking the format from the file extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase();

        let catalog = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => {
                return Err(TxingError::Config(format!(
                    "unsupported channel catalog format: .{}",
                    other
                )))
            }
        };

        Ok(catalog)
    }
}

/// Channels held in memory behind a lock
#[derive(Debug, Default)]
pub struct InMemoryChannelStore {
    channels: RwLock<Vec<Channel>>,
}

impl InMemoryChannelStore {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: RwLock::new(channels),
        }
    }

    pub fn from_catalog(catalog: ChannelCatalog) -> Self {
        Self::new(catalog.channels)
    }

    /// Insert or replace a channel by id.
    pub fn upsert(&self, channel: Channel) {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "txing.channel.store", "channel store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        match channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => channels.push(channel),
        }
    }

    fn snapshot(&self) -> Vec<Channel> {
        match self.channels.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                tracing::warn!(target: "txing.channel.store", "channel store lock was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }
}

impl ChannelStore for InMemoryChannelStore {
    fn enabled_channels_for_model(&self, model: &str) -> Result<Vec<Channel>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|c| c.status && c.supports_model(model))
            .collect())
    }

    fn all_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.snapshot())
    }
}
