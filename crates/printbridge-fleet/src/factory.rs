//! Session construction.

use printbridge_device::{Capabilities, DeviceSession, SessionHooks};

use crate::error::Result;
use crate::types::PrinterDescriptor;

/// Opens a device session for a printer descriptor.
pub trait SessionFactory: Send + Sync {
    /// Open a session reporting through `hooks`.
    fn open(&self, descriptor: &PrinterDescriptor, hooks: SessionHooks) -> Result<DeviceSession>;
}

/// [`SessionFactory`] connecting to real printers over MQTT.
#[derive(Clone, Default)]
pub struct MqttSessionFactory {
    capabilities: Capabilities,
}

impl MqttSessionFactory {
    /// Open sessions with the given settings and backends.
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

impl SessionFactory for MqttSessionFactory {
    fn open(&self, descriptor: &PrinterDescriptor, hooks: SessionHooks) -> Result<DeviceSession> {
        Ok(DeviceSession::connect(
            descriptor.device_config(),
            self.capabilities.clone(),
            hooks,
        ))
    }
}
