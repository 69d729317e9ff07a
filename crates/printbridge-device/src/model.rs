//! Printer model detection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Bambu Lab printer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterModel {
    /// X1 Carbon.
    X1C,
    /// X1.
    X1,
    /// X1E.
    X1E,
    /// P1P.
    P1P,
    /// P1S.
    P1S,
    /// A1.
    A1,
    /// A1 mini.
    A1M,
}

/// How a model delivers telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    /// The printer publishes reports on its own.
    Push,
    /// The printer only reports when asked with `pushall`.
    Poll,
}

/// How a model exposes its camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    /// RTSP live stream, one frame is extracted per snapshot.
    Stream,
    /// JPEG stills on the framed snapshot socket.
    Static,
}

/// Serial number prefixes as reported by the `ota` module.
const SERIAL_PREFIXES: &[(&str, PrinterModel)] = &[
    ("00M", PrinterModel::X1C),
    ("00W", PrinterModel::X1),
    ("03W", PrinterModel::X1E),
    ("01S", PrinterModel::P1P),
    ("01P", PrinterModel::P1S),
    ("030", PrinterModel::A1),
    ("039", PrinterModel::A1M),
];

impl PrinterModel {
    /// All known models.
    pub const ALL: [PrinterModel; 7] = [
        PrinterModel::X1C,
        PrinterModel::X1,
        PrinterModel::X1E,
        PrinterModel::P1P,
        PrinterModel::P1S,
        PrinterModel::A1,
        PrinterModel::A1M,
    ];

    /// Resolve the model from a device serial number.
    ///
    /// Only the first three characters matter. Unknown prefixes resolve
    /// to [`PrinterModel::X1C`].
    pub fn from_serial(serial: &str) -> Self {
        let prefix = serial.get(..3).unwrap_or(serial);
        SERIAL_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, model)| *model)
            .unwrap_or(PrinterModel::X1C)
    }

    /// Telemetry delivery mode for this model.
    pub fn telemetry(self) -> TelemetryMode {
        match self {
            PrinterModel::P1S | PrinterModel::P1P | PrinterModel::A1 | PrinterModel::A1M => {
                TelemetryMode::Poll
            }
            PrinterModel::X1C | PrinterModel::X1 | PrinterModel::X1E => TelemetryMode::Push,
        }
    }

    /// Camera access method for this model.
    pub fn camera(self) -> CameraKind {
        match self.telemetry() {
            TelemetryMode::Poll => CameraKind::Static,
            TelemetryMode::Push => CameraKind::Stream,
        }
    }

    /// Model name as used by the control plane.
    pub fn as_str(self) -> &'static str {
        match self {
            PrinterModel::X1C => "X1C",
            PrinterModel::X1 => "X1",
            PrinterModel::X1E => "X1E",
            PrinterModel::P1P => "P1P",
            PrinterModel::P1S => "P1S",
            PrinterModel::A1 => "A1",
            PrinterModel::A1M => "A1M",
        }
    }
}

impl fmt::Display for PrinterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrinterModel {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        PrinterModel::ALL
            .into_iter()
            .find(|model| model.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| DeviceError::InvalidInput(format!("unknown printer model: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_prefix_table() {
        let cases = [
            ("00M09A350100123", PrinterModel::X1C),
            ("00W00A000000000", PrinterModel::X1),
            ("03W00X000000000", PrinterModel::X1E),
            ("01S00C000000000", PrinterModel::P1P),
            ("01P00A000000000", PrinterModel::P1S),
            ("03000A000000000", PrinterModel::A1),
            ("03919A000000000", PrinterModel::A1M),
        ];

        for (serial, model) in cases {
            assert_eq!(PrinterModel::from_serial(serial), model, "{serial}");
        }
    }

    #[test]
    fn test_unknown_prefix_defaults_to_x1c() {
        assert_eq!(PrinterModel::from_serial("094ABC"), PrinterModel::X1C);
        assert_eq!(PrinterModel::from_serial("0"), PrinterModel::X1C);
        assert_eq!(PrinterModel::from_serial(""), PrinterModel::X1C);
        // exact prefix match only
        assert_eq!(PrinterModel::from_serial("00m123"), PrinterModel::X1C);
    }

    #[test]
    fn test_telemetry_classes() {
        for model in [PrinterModel::P1S, PrinterModel::P1P, PrinterModel::A1, PrinterModel::A1M] {
            assert_eq!(model.telemetry(), TelemetryMode::Poll);
            assert_eq!(model.camera(), CameraKind::Static);
        }
        for model in [PrinterModel::X1C, PrinterModel::X1, PrinterModel::X1E] {
            assert_eq!(model.telemetry(), TelemetryMode::Push);
            assert_eq!(model.camera(), CameraKind::Stream);
        }
    }

    #[test]
    fn test_parse_model_hint() {
        assert_eq!("P1S".parse::<PrinterModel>().unwrap(), PrinterModel::P1S);
        assert_eq!("a1m".parse::<PrinterModel>().unwrap(), PrinterModel::A1M);
        assert!("Ender 3".parse::<PrinterModel>().is_err());

        for model in PrinterModel::ALL {
            assert_eq!(model.to_string().parse::<PrinterModel>().unwrap(), model);
        }
    }
}
