//! Configuration for trialscope, loadable from YAML.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filters::DEFAULT_MAX_TRIALS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Base URL of the master (e.g. "http://localhost:8080")
    pub master_url: String,
    /// Bearer token sent with every master request
    pub auth_token: Option<String>,
    /// Address the server binds to
    pub host: String,
    pub port: u16,
    /// Experiment details poll interval in milliseconds (default: 5000)
    pub poll_interval_ms: u64,
    /// Default trial cap for sample streams (default: 100)
    pub max_trials: u32,
    /// SSE keep-alive interval in seconds (default: 15)
    pub keep_alive_secs: u64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            master_url: "http://localhost:8080".to_string(),
            auth_token: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
            poll_interval_ms: 5000,
            max_trials: DEFAULT_MAX_TRIALS,
            keep_alive_secs: 15,
        }
    }
}

impl ScopeConfig {
    /// Load from a YAML file. A missing file yields the defaults; keys
    /// absent from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = ScopeConfig::load(&tmp.path().join("scope.yaml")).unwrap();
        assert_eq!(cfg, ScopeConfig::default());
        assert_eq!(cfg.keep_alive(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scope.yaml");
        fs::write(&path, "master_url: http://master:8080\nport: 9000\n").unwrap();
        let cfg = ScopeConfig::load(&path).unwrap();
        assert_eq!(cfg.master_url, "http://master:8080");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_trials, 100);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scope.yaml");
        let cfg = ScopeConfig {
            auth_token: Some("secret".into()),
            max_trials: 25,
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(ScopeConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scope.yaml");
        fs::write(&path, "port: [not a port]\n").unwrap();
        assert!(ScopeConfig::load(&path).is_err());
    }
}
