//! Connection settings for printer sessions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where and how to reach one printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Printer host name or IP address.
    pub host: String,
    /// Printer serial number; selects the MQTT topics.
    pub serial: String,
    /// LAN access code, used as the password on every channel.
    pub access_code: String,
    /// Model reported by the control plane, used until the printer
    /// identifies itself.
    pub model_hint: Option<String>,
}

impl DeviceConfig {
    /// Create a new configuration.
    pub fn new(host: impl Into<String>, serial: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            serial: serial.into(),
            access_code: access_code.into(),
            model_hint: None,
        }
    }

    /// Set the model hint.
    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    pub(crate) fn report_topic(&self) -> String {
        format!("device/{}/report", self.serial)
    }

    pub(crate) fn request_topic(&self) -> String {
        format!("device/{}/request", self.serial)
    }
}

/// Ports, timeouts and intervals shared by all sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Username on every printer channel.
    pub username: String,
    /// MQTT over TLS port.
    pub mqtt_port: u16,
    /// Framed snapshot socket port.
    pub snapshot_port: u16,
    /// Implicit FTPS port.
    pub ftp_port: u16,
    /// RTSPS camera stream port.
    pub rtsp_port: u16,
    /// `pushall` period for poll-based models.
    pub poll_interval_secs: u64,
    /// Delay between MQTT reconnection attempts.
    pub reconnect_delay_secs: u64,
    /// MQTT connect timeout.
    pub connect_timeout_secs: u64,
    /// MQTT keep-alive.
    pub keep_alive_secs: u64,
    /// Deadline for one file upload.
    pub upload_timeout_secs: u64,
    /// Deadline for extracting one frame from the camera stream.
    pub extract_timeout_secs: u64,
    /// Idle timeout between reads on the snapshot socket.
    pub snapshot_read_timeout_secs: u64,
    /// Frame extractor executable.
    pub ffmpeg_path: PathBuf,
}

impl SessionSettings {
    /// `pushall` period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Reconnection delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Upload deadline.
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Frame extraction deadline.
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    /// Snapshot socket idle timeout.
    pub fn snapshot_read_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_read_timeout_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            username: "bblp".into(),
            mqtt_port: 8883,
            snapshot_port: 6000,
            ftp_port: 990,
            rtsp_port: 322,
            poll_interval_secs: 15,
            reconnect_delay_secs: 1,
            connect_timeout_secs: 2,
            keep_alive_secs: 60,
            upload_timeout_secs: 1800,
            extract_timeout_secs: 10,
            snapshot_read_timeout_secs: 5,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let config = DeviceConfig::new("10.0.0.5", "01P00A391800213", "12345678");
        assert_eq!(config.report_topic(), "device/01P00A391800213/report");
        assert_eq!(config.request_topic(), "device/01P00A391800213/request");
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"poll_interval_secs": 30}"#).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_secs(30));
        assert_eq!(settings.mqtt_port, 8883);
        assert_eq!(settings.username, "bblp");
    }
}
