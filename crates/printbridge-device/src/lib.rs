#![warn(missing_docs)]

//! Protocol session for Bambu Lab printers on the local network.
//!
//! This crate provides:
//! - MQTT telemetry with per-model polling and status normalization
//! - Print control (start, stop) over the request topic
//! - File upload over implicit FTPS
//! - Camera snapshots, from the framed snapshot socket or the RTSPS stream
//!
//! # Example
//!
//! ```ignore
//! use printbridge_device::{Capabilities, DeviceConfig, DeviceSession, SessionHooks};
//!
//! let config = DeviceConfig::new("192.168.1.20", "01P00A391800213", "12345678");
//! let hooks = SessionHooks::new(
//!     |status| println!("state: {}", status.state),
//!     || println!("disconnected"),
//! );
//! let session = DeviceSession::connect(config, Capabilities::default(), hooks);
//!
//! session.upload_file("cube.3mf", std::fs::read("cube.3mf")?).await?;
//! session.print("cube.3mf", &[], "Metadata/plate_1.gcode");
//! ```

pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod tls;
pub mod transfer;

pub use channel::{Channel, MqttChannel};
pub use commands::RequestCommand;
pub use config::{DeviceConfig, SessionSettings};
pub use error::{DeviceError, Result};
pub use frame::{encode_auth_frame, FrameDecoder};
pub use model::{CameraKind, PrinterModel, TelemetryMode};
pub use session::{Capabilities, DeviceSession, SessionHooks};
pub use snapshot::{FfmpegExtractor, FrameExtractor};
pub use status::{ModuleInfo, PrintStatus, Report, VersionInfo};
pub use transfer::{FileTransfer, FtpsTransfer, TransferTarget};
