//! Configuration loading and management
//!
//! Handles parsing of `.ideaflow.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::storage::DATA_DIR;

/// Name of the configuration file looked up in the root
pub const CONFIG_FILE: &str = ".ideaflow.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Timeline rendering configuration
    #[serde(default)]
    pub timeline: TimelineConfig,
}

/// Storage-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory, relative to the root
    #[serde(default = "default_storage_dir")]
    pub dir: String,

    /// How long a transition waits for another process holding the task
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_storage_dir() -> String {
    DATA_DIR.to_string()
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Timeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Coalesce linked same-type states into one band
    #[serde(default = "default_true")]
    pub merge_linked: bool,

    /// Attach raw events to timeline output
    #[serde(default = "default_true")]
    pub include_events: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            merge_linked: true,
            include_events: true,
        }
    }
}

impl Config {
    /// Load configuration from a `.ideaflow.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the root, or return defaults when absent
    ///
    /// A present but invalid file is an error rather than silently ignored.
    pub fn load_from_root(root: &Path) -> crate::error::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> crate::error::Result<()> {
        self.storage.validate()
    }
}

impl StorageConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.dir.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "storage.dir cannot be empty".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "storage.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.dir, ".ideaflow");
        assert_eq!(cfg.storage.lock_timeout_ms, 5000);
        assert!(cfg.timeline.merge_linked);
        assert!(cfg.timeline.include_events);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[storage]
dir = "state"
lock_timeout_ms = 250

[timeline]
merge_linked = false
include_events = false
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.storage.dir, "state");
        assert_eq!(cfg.storage.lock_timeout_ms, 250);
        assert!(!cfg.timeline.merge_linked);
        assert!(!cfg.timeline.include_events);
    }

    #[test]
    fn invalid_storage_config_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[storage]\nlock_timeout_ms = 0").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            crate::error::Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_from_root_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_root(dir.path()).expect("defaults");
        assert_eq!(cfg.storage.dir, ".ideaflow");
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("merge_linked = true"));
    }
}
