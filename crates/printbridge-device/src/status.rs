//! Printer report decoding and status normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeviceError, Result};
use crate::model::PrinterModel;

/// Normalized print status, as reported to the control plane.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrintStatus {
    /// Lower-cased `gcode_state` (e.g. `"running"`, `"idle"`, `"finish"`).
    pub state: String,
    /// Print progress (0-100).
    #[serde(rename = "progress", skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    /// Remaining time in minutes.
    #[serde(rename = "remaining_time", skip_serializing_if = "Option::is_none")]
    pub remaining_time_min: Option<i64>,
    /// Current gcode file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Bed temperature (°C).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed_temperature: Option<f64>,
    /// Nozzle temperature (°C).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nozzle_temperature: Option<f64>,
    /// AMS unit documents, in the order the printer reports them.
    #[serde(default)]
    pub ams: Vec<Value>,
    /// Total layer count.
    #[serde(default)]
    pub total_layers: i64,
    /// Current layer number.
    #[serde(default)]
    pub current_layer: i64,
    /// Printer error code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_error: Option<i64>,
    /// Whether the filament runout sensor is triggered.
    #[serde(default)]
    pub filament_sensor: bool,
}

/// A module entry from a `get_version` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name (e.g. `"ota"`, `"mc"`, `"ams/0"`).
    pub name: String,
    /// Module serial number.
    pub serial: Option<String>,
    /// Module software version.
    pub version: Option<String>,
}

/// Answer to a `get_version` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionInfo {
    /// Reported modules.
    pub modules: Vec<ModuleInfo>,
}

impl VersionInfo {
    /// Serial number of the `ota` module, which identifies the printer.
    pub fn device_serial(&self) -> Option<&str> {
        self.modules
            .iter()
            .find(|m| m.name == "ota")
            .and_then(|m| m.serial.as_deref())
    }

    /// Model derived from the `ota` serial, if one was reported.
    pub fn model(&self) -> Option<PrinterModel> {
        self.device_serial().map(PrinterModel::from_serial)
    }
}

/// A decoded message from a printer's report topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Module listing, sent in answer to `get_version`.
    Info(VersionInfo),
    /// Print telemetry carrying a defined `gcode_state`.
    Print(PrintStatus),
    /// Anything else: partial telemetry, command acks, other sections.
    Unknown,
}

impl Report {
    /// Decode a raw MQTT payload.
    ///
    /// Fails only when the payload is not JSON.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DeviceError::protocol(format!("invalid report payload: {e}")))?;
        Ok(Self::from_value(&value))
    }

    /// Classify an already parsed payload.
    pub fn from_value(payload: &Value) -> Self {
        if let Some(info) = payload.get("info") {
            return Report::Info(parse_version_info(info));
        }

        match payload.get("print") {
            Some(print) => match print.get("gcode_state").and_then(Value::as_str) {
                Some(state) => Report::Print(parse_print_status(state, print)),
                None => Report::Unknown,
            },
            None => Report::Unknown,
        }
    }
}

fn parse_version_info(info: &Value) -> VersionInfo {
    let modules = info
        .get("module")
        .and_then(Value::as_array)
        .map(|modules| {
            modules
                .iter()
                .filter_map(|module| {
                    let name = module.get("name").and_then(Value::as_str)?;
                    Some(ModuleInfo {
                        name: name.to_string(),
                        serial: module.get("sn").and_then(Value::as_str).map(str::to_string),
                        version: module
                            .get("sw_ver")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    VersionInfo { modules }
}

fn parse_print_status(state: &str, print: &Value) -> PrintStatus {
    let int = |key: &str| print.get(key).and_then(as_int);

    PrintStatus {
        state: state.to_lowercase(),
        progress_percent: print.get("mc_percent").and_then(Value::as_f64),
        remaining_time_min: int("mc_remaining_time"),
        file_name: print
            .get("gcode_file")
            .and_then(Value::as_str)
            .map(str::to_string),
        bed_temperature: print.get("bed_temper").and_then(Value::as_f64),
        nozzle_temperature: print.get("nozzle_temper").and_then(Value::as_f64),
        ams: print
            .get("ams")
            .and_then(|ams| ams.get("ams"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        total_layers: int("total_layer_num").unwrap_or(0),
        current_layer: int("layer_num").unwrap_or(0),
        print_error: int("print_error"),
        filament_sensor: int("hw_switch_state") == Some(1),
    }
}

/// Integers occasionally arrive as floats or strings depending on firmware.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_info_report() {
        let payload = json!({
            "info": {
                "command": "get_version",
                "sequence_id": "0",
                "module": [
                    {"name": "mc", "sn": "MC123", "sw_ver": "00.00.22.10"},
                    {"name": "ota", "sn": "01P00A391800213", "sw_ver": "01.06.00.00"}
                ]
            }
        });

        let Report::Info(info) = Report::from_value(&payload) else {
            panic!("expected info report");
        };
        assert_eq!(info.modules.len(), 2);
        assert_eq!(info.device_serial(), Some("01P00A391800213"));
        assert_eq!(info.model(), Some(PrinterModel::P1S));
    }

    #[test]
    fn test_info_without_ota_has_no_model() {
        let payload = json!({"info": {"command": "get_version", "module": [{"name": "mc"}]}});
        let Report::Info(info) = Report::from_value(&payload) else {
            panic!("expected info report");
        };
        assert_eq!(info.model(), None);
    }

    #[test]
    fn test_decode_print_report() {
        let payload = json!({
            "print": {
                "gcode_state": "RUNNING",
                "mc_percent": 42,
                "mc_remaining_time": 73,
                "gcode_file": "benchy.3mf",
                "bed_temper": 55.0,
                "nozzle_temper": 219.5,
                "ams": {"ams": [{"id": "0", "tray": []}]},
                "total_layer_num": 120,
                "layer_num": 50,
                "print_error": 0,
                "hw_switch_state": 1
            }
        });

        let Report::Print(status) = Report::from_value(&payload) else {
            panic!("expected print report");
        };
        assert_eq!(status.state, "running");
        assert_eq!(status.progress_percent, Some(42.0));
        assert_eq!(status.remaining_time_min, Some(73));
        assert_eq!(status.file_name.as_deref(), Some("benchy.3mf"));
        assert_eq!(status.bed_temperature, Some(55.0));
        assert_eq!(status.nozzle_temperature, Some(219.5));
        assert_eq!(status.ams.len(), 1);
        assert_eq!(status.total_layers, 120);
        assert_eq!(status.current_layer, 50);
        assert_eq!(status.print_error, Some(0));
        assert!(status.filament_sensor);
    }

    #[test]
    fn test_partial_print_report_defaults() {
        let payload = json!({"print": {"gcode_state": "IDLE"}});
        let Report::Print(status) = Report::from_value(&payload) else {
            panic!("expected print report");
        };
        assert_eq!(status.state, "idle");
        assert!(status.ams.is_empty());
        assert_eq!(status.total_layers, 0);
        assert_eq!(status.current_layer, 0);
        assert!(!status.filament_sensor);
        assert_eq!(status.print_error, None);
    }

    #[test]
    fn test_print_without_state_is_unknown() {
        let payload = json!({"print": {"mc_percent": 10, "command": "push_status"}});
        assert_eq!(Report::from_value(&payload), Report::Unknown);
        assert_eq!(Report::from_value(&json!({"system": {}})), Report::Unknown);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(matches!(
            Report::decode(b"not json"),
            Err(DeviceError::Protocol(_))
        ));
    }

    #[test]
    fn test_status_wire_names() {
        let status = PrintStatus {
            state: "running".into(),
            progress_percent: Some(5.0),
            remaining_time_min: Some(10),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["progress"], 5.0);
        assert_eq!(json["remaining_time"], 10);
        assert_eq!(json["filament_sensor"], false);
        assert!(json.get("bed_temperature").is_none());
    }
}
