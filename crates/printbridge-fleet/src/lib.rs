#![warn(missing_docs)]

//! Fleet reconciliation between the control plane and printer sessions.
//!
//! A [`Reconciler`] keeps one [`DeviceSession`](printbridge_device::DeviceSession)
//! per printer the control plane lists, reports their status on every
//! update cycle, and executes the start and stop commands it receives.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use printbridge_fleet::{BridgeConfig, HttpControlPlane, MqttSessionFactory, Reconciler};
//!
//! let config = BridgeConfig::load()?;
//! let control = Arc::new(HttpControlPlane::new(&config.control_plane)?);
//! let factory = Arc::new(MqttSessionFactory::default());
//! Reconciler::new(control, factory, config.fleet)
//!     .run_until(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await;
//! ```

mod camera;
pub mod config;
pub mod control;
pub mod error;
pub mod factory;
pub mod reconciler;
pub mod registry;
pub mod types;

pub use config::{BridgeConfig, ControlPlaneConfig, FleetConfig};
pub use control::{ControlPlane, HttpControlPlane};
pub use error::{FleetError, Result};
pub use factory::{MqttSessionFactory, SessionFactory};
pub use reconciler::Reconciler;
pub use registry::{ManagedSession, SessionRegistry};
pub use types::{
    Command, Drift, FleetErrorCode, PrinterDescriptor, PrinterId, PrinterOptions, PrinterReport,
    StartPrint, StatusReport,
};
