// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::{Path, PathBuf};

use crate::error::Result;

use super::Settings;

impl Settings {
    /// Get the default settings file path.
    pub fn default_path() -> PathBuf {
        Self::txing_home().join("settings.json")
    }

    /// Load settings from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the txing home directory (~/.txing or $TXING_HOME).
    pub fn txing_home() -> PathBuf {
        if let Ok(home) = std::env::var("TXING_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".txing")
    }

    /// Channel catalog path: the configured one, else `<home>/channels.json`.
    pub fn channels_path(&self) -> PathBuf {
        self.channels_file
            .clone()
            .unwrap_or_else(|| Self::txing_home().join("channels.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.gateway.relay_capacity, 20);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.agent.max_steps = 42;
        settings.channels_file = Some(PathBuf::from("/etc/txing/channels.yaml"));
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.agent.max_steps, 42);
        assert_eq!(
            loaded.channels_path(),
            PathBuf::from("/etc/txing/channels.yaml")
        );
    }

    #[test]
    fn test_load_invalid_json_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
