use crate::cache::SupplementMerge;
use crate::error::{EvokError, Result};
use crate::types::ControllerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

fn default_name() -> String {
    "UniPi".to_string()
}

fn default_model() -> String {
    "CUSTOM".to_string()
}

fn default_reconnect_time() -> u64 {
    30
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_rest_path() -> String {
    "/rest/all".to_string()
}

fn default_fetch_rest() -> bool {
    true
}

fn default_rest_timeout() -> u64 {
    5
}

/// Settings for one controller session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Display name, also the controller's identity in notifications
    #[serde(default = "default_name")]
    pub name: String,

    /// Host name or IP address, optionally with a port
    #[serde(alias = "ip_address")]
    pub host: String,

    /// Controller model tag (e.g. `M203`), informational
    #[serde(default = "default_model", alias = "type")]
    pub model: String,

    /// Seconds to wait between reconnect attempts
    #[serde(default = "default_reconnect_time")]
    pub reconnect_time: u64,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_rest_path")]
    pub rest_path: String,

    /// Enrich the snapshot with `/rest/all` after every connect
    #[serde(default = "default_fetch_rest")]
    pub fetch_rest: bool,

    /// Seconds before the `/rest/all` fetch is abandoned
    #[serde(default = "default_rest_timeout")]
    pub rest_timeout: u64,

    /// Precedence of `/rest/all` fields over WebSocket fields
    #[serde(default)]
    pub supplement_merge: SupplementMerge,
}

impl SessionConfig {
    /// Configuration with defaults for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            host: host.into(),
            model: default_model(),
            reconnect_time: default_reconnect_time(),
            ws_path: default_ws_path(),
            rest_path: default_rest_path(),
            fetch_rest: default_fetch_rest(),
            rest_timeout: default_rest_timeout(),
            supplement_merge: SupplementMerge::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_reconnect_time(mut self, seconds: u64) -> Self {
        self.reconnect_time = seconds;
        self
    }

    pub fn with_rest(mut self, enabled: bool) -> Self {
        self.fetch_rest = enabled;
        self
    }

    pub fn with_rest_timeout(mut self, seconds: u64) -> Self {
        self.rest_timeout = seconds;
        self
    }

    pub fn with_supplement_merge(mut self, policy: SupplementMerge) -> Self {
        self.supplement_merge = policy;
        self
    }

    pub fn controller_id(&self) -> ControllerId {
        ControllerId::new(self.name.clone())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_time)
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout)
    }

    /// WebSocket URL of the controller
    pub fn ws_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("ws://{}{}", self.host, self.ws_path))?)
    }

    /// URL of the bulk `/rest/all` endpoint
    pub fn rest_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("http://{}{}", self.host, self.rest_path))?)
    }

    /// Check the settings a session cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(EvokError::Config(format!(
                "controller '{}' has no host",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(EvokError::Config("controller name is empty".to_string()));
        }
        if self.reconnect_time == 0 {
            return Err(EvokError::Config(format!(
                "controller '{}': reconnect_time must be positive",
                self.name
            )));
        }
        self.ws_url()?;
        if self.fetch_rest {
            self.rest_url()?;
        }
        Ok(())
    }
}

/// Configuration for every controller the application bridges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default, rename = "controller")]
    pub controllers: Vec<SessionConfig>,
}

impl BridgeConfig {
    /// Parse and validate a TOML document
    ///
    /// ```toml
    /// [[controller]]
    /// name = "Basement"
    /// host = "192.168.1.40"
    /// reconnect_time = 10
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate every controller; names must be unique
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for controller in &self.controllers {
            controller.validate()?;
            if !names.insert(controller.name.as_str()) {
                return Err(EvokError::Config(format!(
                    "controller name '{}' is used more than once",
                    controller.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_integration_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [[controller]]
            ip_address = "10.0.0.7"
            "#,
        )
        .unwrap();

        let c = &config.controllers[0];
        assert_eq!(c.name, "UniPi");
        assert_eq!(c.model, "CUSTOM");
        assert_eq!(c.reconnect_interval(), Duration::from_secs(30));
        assert_eq!(c.rest_timeout(), Duration::from_secs(5));
        assert!(c.fetch_rest);
        assert_eq!(c.supplement_merge, SupplementMerge::FillMissing);
        assert_eq!(c.ws_url().unwrap().as_str(), "ws://10.0.0.7/ws");
        assert_eq!(c.rest_url().unwrap().as_str(), "http://10.0.0.7/rest/all");
    }

    #[test]
    fn parses_full_controller_table() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [[controller]]
            name = "Garage"
            host = "garage.local:8080"
            type = "M503"
            reconnect_time = 10
            fetch_rest = false
            supplement_merge = "overwrite"

            [[controller]]
            name = "Attic"
            host = "10.0.0.8"
            "#,
        )
        .unwrap();

        assert_eq!(config.controllers.len(), 2);
        let garage = &config.controllers[0];
        assert_eq!(garage.model, "M503");
        assert_eq!(garage.controller_id(), ControllerId::new("Garage"));
        assert_eq!(garage.supplement_merge, SupplementMerge::Overwrite);
        assert!(!garage.fetch_rest);
        assert_eq!(garage.ws_url().unwrap().as_str(), "ws://garage.local:8080/ws");
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [[controller]]
            name = "Neuron"
            host = "10.0.0.1"

            [[controller]]
            name = "Neuron"
            host = "10.0.0.2"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EvokError::Config(_)));
    }

    #[test]
    fn rejects_zero_reconnect_time() {
        let config = SessionConfig::new("10.0.0.1").with_reconnect_time(0);
        assert!(matches!(config.validate(), Err(EvokError::Config(_))));
    }

    #[test]
    fn rejects_missing_host() {
        assert!(BridgeConfig::from_toml_str("[[controller]]\nname = \"x\"\n").is_err());
        assert!(SessionConfig::new("  ").validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unipi.toml");
        std::fs::write(&path, "[[controller]]\nhost = \"10.1.1.1\"\n").unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.controllers[0].host, "10.1.1.1");
    }
}
