//! Control plane wire types.

use std::collections::BTreeMap;
use std::fmt;

use printbridge_device::{DeviceConfig, PrintStatus};
use serde::{Deserialize, Deserializer, Serialize};

/// Printer identifier assigned by the control plane.
///
/// The control plane sends ids as numbers or strings; both normalize to
/// the same string key and serialize back as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PrinterId(String);

impl PrinterId {
    /// Create an id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrinterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrinterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for PrinterId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for PrinterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Unsigned(u64),
            Signed(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// Connection options for one printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterOptions {
    /// Printer address on the local network.
    pub host: String,
    /// LAN access code.
    pub access_token: String,
    /// Printer serial number.
    pub serial_number: String,
}

/// A printer the control plane wants managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterDescriptor {
    /// Printer id.
    pub id: PrinterId,
    /// Model name as entered by the operator. May be empty.
    #[serde(default)]
    pub model: String,
    /// Connection options.
    pub options: PrinterOptions,
}

impl PrinterDescriptor {
    /// Session configuration for this printer.
    pub fn device_config(&self) -> DeviceConfig {
        let config = DeviceConfig::new(
            self.options.host.clone(),
            self.options.serial_number.clone(),
            self.options.access_token.clone(),
        );
        if self.model.is_empty() {
            config
        } else {
            config.with_model_hint(self.model.clone())
        }
    }

    /// First field that differs from `desired`, if any.
    pub fn drift(&self, desired: &PrinterDescriptor) -> Option<Drift> {
        if self.options.access_token != desired.options.access_token {
            Some(Drift::AccessToken)
        } else if self.options.host != desired.options.host {
            Some(Drift::Host)
        } else if self.options.serial_number != desired.options.serial_number {
            Some(Drift::SerialNumber)
        } else if self.model != desired.model {
            Some(Drift::Model)
        } else {
            None
        }
    }
}

/// Descriptor field that no longer matches the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    /// Access code changed.
    AccessToken,
    /// Host changed.
    Host,
    /// Serial number changed.
    SerialNumber,
    /// Model changed.
    Model,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AccessToken => "access token",
            Self::Host => "host",
            Self::SerialNumber => "serial number",
            Self::Model => "model",
        })
    }
}

/// Command issued by the control plane.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Upload a file and print it.
    Start(StartPrint),
    /// Stop the current print.
    Stop {
        /// Target printer.
        #[serde(rename = "printerId")]
        printer_id: PrinterId,
    },
    /// A command kind this bridge does not handle.
    #[serde(other)]
    Unsupported,
}

/// Payload of a start command.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPrint {
    /// Target printer.
    pub printer_id: PrinterId,
    /// Name to store the file under.
    pub file_name: String,
    /// Base64 file content.
    pub file_data: String,
    /// AMS tray mapping.
    #[serde(default)]
    pub trays: Vec<i32>,
    /// Gcode path inside the project, e.g. `Metadata/plate_1.gcode`.
    #[serde(default)]
    pub gcode_file: String,
}

impl fmt::Debug for StartPrint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartPrint")
            .field("printer_id", &self.printer_id)
            .field("file_name", &self.file_name)
            .field("file_data_len", &self.file_data.len())
            .field("trays", &self.trays)
            .field("gcode_file", &self.gcode_file)
            .finish()
    }
}

/// Body of the `init` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    /// Printers to manage.
    #[serde(default)]
    pub printers: Vec<PrinterDescriptor>,
}

/// Body of the `update` answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateResponse {
    /// Commands to execute this cycle.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// The full desired printer set.
    pub printers: Vec<PrinterDescriptor>,
}

/// Error code reported for a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetErrorCode {
    /// The last start command failed to upload its file.
    UploadFailed,
}

/// One printer's entry in an update report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterReport {
    /// Latest status, absent when the printer has not reported yet.
    #[serde(flatten)]
    pub status: Option<PrintStatus>,
    /// Pending error, `null` when there is none.
    pub error: Option<FleetErrorCode>,
}

/// Update report keyed by printer id.
pub type StatusReport = BTreeMap<PrinterId, PrinterReport>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> PrinterDescriptor {
        serde_json::from_value(json!({
            "id": 7,
            "model": "P1S",
            "options": {
                "host": "10.0.0.5",
                "access_token": "12345678",
                "serial_number": "01P00A000000001"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_printer_id_number_and_string() {
        let a: PrinterId = serde_json::from_value(json!(42)).unwrap();
        let b: PrinterId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_value(&a).unwrap(), json!("42"));
    }

    #[test]
    fn test_descriptor_device_config() {
        let config = descriptor().device_config();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.serial, "01P00A000000001");
        assert_eq!(config.access_code, "12345678");
        assert_eq!(config.model_hint.as_deref(), Some("P1S"));
    }

    #[test]
    fn test_drift() {
        let current = descriptor();
        assert_eq!(current.drift(&current.clone()), None);

        let mut desired = current.clone();
        desired.options.host = "10.0.0.6".into();
        assert_eq!(current.drift(&desired), Some(Drift::Host));

        let mut desired = current.clone();
        desired.model = "X1C".into();
        assert_eq!(current.drift(&desired), Some(Drift::Model));

        let mut desired = current.clone();
        desired.options.access_token = "87654321".into();
        assert_eq!(current.drift(&desired), Some(Drift::AccessToken));

        let mut desired = current.clone();
        desired.options.serial_number = "01P00A000000002".into();
        assert_eq!(current.drift(&desired), Some(Drift::SerialNumber));
    }

    #[test]
    fn test_parse_commands() {
        let response: UpdateResponse = serde_json::from_value(json!({
            "commands": [
                {
                    "command": "start",
                    "printerId": 3,
                    "fileName": "cube.3mf",
                    "fileData": "AAEC",
                    "trays": [0, 2],
                    "gcodeFile": "Metadata/plate_1.gcode"
                },
                { "command": "stop", "printerId": "3" },
                { "command": "pause", "printerId": "3" }
            ],
            "printers": []
        }))
        .unwrap();

        assert_eq!(response.commands.len(), 3);
        match &response.commands[0] {
            Command::Start(start) => {
                assert_eq!(start.printer_id, PrinterId::from(3));
                assert_eq!(start.trays, vec![0, 2]);
                assert_eq!(start.gcode_file, "Metadata/plate_1.gcode");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(
            response.commands[1],
            Command::Stop {
                printer_id: PrinterId::from("3")
            }
        );
        assert_eq!(response.commands[2], Command::Unsupported);
    }

    #[test]
    fn test_parse_update_printers() {
        let response: UpdateResponse = serde_json::from_value(json!({
            "commands": [],
            "printers": [{
                "id": 1,
                "model": "X1C",
                "options": {
                    "host": "10.0.0.5",
                    "access_token": "12345678",
                    "serial_number": "00M000"
                }
            }]
        }))
        .unwrap();

        assert_eq!(response.printers.len(), 1);
        let options = &response.printers[0].options;
        assert_eq!(options.access_token, "12345678");
        assert_eq!(options.serial_number, "00M000");
    }

    #[test]
    fn test_parse_init_printers() {
        let response: InitResponse = serde_json::from_value(json!({
            "printers": [{
                "id": "4",
                "options": {
                    "host": "10.0.0.7",
                    "access_token": "abcdefgh",
                    "serial_number": "01S00C000000001"
                }
            }]
        }))
        .unwrap();

        assert_eq!(response.printers[0].id, PrinterId::from(4));
        assert_eq!(response.printers[0].model, "");
    }

    #[test]
    fn test_update_requires_printers() {
        let result: Result<UpdateResponse, _> = serde_json::from_value(json!({ "commands": [] }));
        assert!(result.is_err());
    }

    #[test]
    fn test_report_serialization() {
        let mut report = StatusReport::new();
        report.insert(
            PrinterId::from("1"),
            PrinterReport {
                status: Some(PrintStatus {
                    state: "running".into(),
                    progress_percent: Some(40.0),
                    ..PrintStatus::default()
                }),
                error: None,
            },
        );
        report.insert(
            PrinterId::from("2"),
            PrinterReport {
                status: None,
                error: Some(FleetErrorCode::UploadFailed),
            },
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["1"]["state"], "running");
        assert_eq!(value["1"]["progress"], 40.0);
        assert!(value["1"]["error"].is_null());
        assert_eq!(value["2"]["error"], "UPLOAD_FAILED");
        assert!(value["2"].get("state").is_none());
    }
}
