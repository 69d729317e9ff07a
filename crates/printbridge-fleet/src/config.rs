//! Bridge configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then
//! `PRINTBRIDGE_`-prefixed environment variables with `__` separating
//! sections (e.g. `PRINTBRIDGE_CONTROL_PLANE__API_KEY`).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use printbridge_device::SessionSettings;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "printbridge.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PRINTBRIDGE_";

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Control plane endpoint and credentials.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Reconciliation timing.
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Printer protocol settings.
    #[serde(default)]
    pub device: SessionSettings,
}

impl BridgeConfig {
    /// Load from `printbridge.toml` in the working directory and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Parse from a TOML string, without the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(content))
            .extract()
            .map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Check values that defaults cannot fill in.
    pub fn validate(&self) -> Result<()> {
        if self.control_plane.api_key.trim().is_empty() {
            return Err(FleetError::Config("control_plane.api_key is not set".into()));
        }
        if !self.control_plane.base_url.starts_with("http://")
            && !self.control_plane.base_url.starts_with("https://")
        {
            return Err(FleetError::Config(format!(
                "control_plane.base_url must be an http(s) URL: {}",
                self.control_plane.base_url
            )));
        }
        if self.fleet.update_interval_secs == 0 {
            return Err(FleetError::Config(
                "fleet.update_interval_secs must be positive".into(),
            ));
        }
        if self.fleet.camera_enabled && self.fleet.camera_interval_secs == 0 {
            return Err(FleetError::Config(
                "fleet.camera_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.control_plane.api_key.is_empty() {
            config.control_plane.api_key = "********".into();
        }
        config
    }
}

/// Control plane settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL; `/init`, `/update` and `/camera` are appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for every request.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_base_url() -> String {
    "https://my.jetforge.app/api/bridge/bambu".into()
}

fn default_timeout_secs() -> u64 {
    5
}

/// Reconciliation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Seconds between update cycles.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Seconds to wait before retrying a failed init.
    #[serde(default = "default_init_retry_secs")]
    pub init_retry_secs: u64,

    /// Seconds between camera uploads per printer.
    #[serde(default = "default_camera_interval_secs")]
    pub camera_interval_secs: u64,

    /// Whether to upload camera images at all.
    #[serde(default = "default_camera_enabled")]
    pub camera_enabled: bool,
}

impl FleetConfig {
    /// Update cycle period.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    /// Delay between init attempts.
    pub fn init_retry(&self) -> Duration {
        Duration::from_secs(self.init_retry_secs)
    }

    /// Delay between camera uploads.
    pub fn camera_interval(&self) -> Duration {
        Duration::from_secs(self.camera_interval_secs.max(1))
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval_secs(),
            init_retry_secs: default_init_retry_secs(),
            camera_interval_secs: default_camera_interval_secs(),
            camera_enabled: default_camera_enabled(),
        }
    }
}

fn default_update_interval_secs() -> u64 {
    5
}

fn default_init_retry_secs() -> u64 {
    30
}

fn default_camera_interval_secs() -> u64 {
    5
}

fn default_camera_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(
            config.control_plane.base_url,
            "https://my.jetforge.app/api/bridge/bambu"
        );
        assert_eq!(config.control_plane.timeout_secs, 5);
        assert_eq!(config.fleet.update_interval(), Duration::from_secs(5));
        assert_eq!(config.fleet.init_retry(), Duration::from_secs(30));
        assert!(config.fleet.camera_enabled);
        assert_eq!(config.device.mqtt_port, 8883);
    }

    #[test]
    fn test_from_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [control_plane]
            base_url = "http://localhost:8080/bridge"
            api_key = "secret"

            [fleet]
            update_interval_secs = 10
            camera_enabled = false

            [device]
            poll_interval_secs = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.control_plane.base_url, "http://localhost:8080/bridge");
        assert_eq!(config.fleet.update_interval_secs, 10);
        assert!(!config.fleet.camera_enabled);
        assert_eq!(config.fleet.camera_interval_secs, 5);
        assert_eq!(config.device.poll_interval_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = BridgeConfig::default();
        config.control_plane.api_key = "secret".into();
        config.control_plane.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = BridgeConfig::default();
        config.control_plane.api_key = "secret".into();
        let shown = config.redacted();
        assert_ne!(shown.control_plane.api_key, "secret");
        assert!(!format!("{:?}", config.control_plane).contains("secret"));
    }
}
