//! Live sessions keyed by printer id.

use std::collections::BTreeMap;
use std::sync::Arc;

use printbridge_device::DeviceSession;
use tokio::task::JoinHandle;

use crate::types::{PrinterDescriptor, PrinterId};

/// A session together with the descriptor it was opened from.
///
/// Dropping the entry finishes the session and stops its camera task.
#[derive(Debug)]
pub struct ManagedSession {
    /// Descriptor the session was opened from.
    pub descriptor: PrinterDescriptor,
    /// The session.
    pub session: Arc<DeviceSession>,
    /// Distinguishes this session from earlier ones for the same printer.
    pub generation: u64,
    camera: Option<JoinHandle<()>>,
}

impl ManagedSession {
    /// Wrap a freshly opened session.
    pub fn new(
        descriptor: PrinterDescriptor,
        session: Arc<DeviceSession>,
        generation: u64,
        camera: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            descriptor,
            session,
            generation,
            camera,
        }
    }

    /// Whether a camera uploader runs for this session.
    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.abort();
        }
        self.session.finish();
    }
}

/// At most one live session per printer id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<PrinterId, ManagedSession>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether a session exists for `id`.
    pub fn contains(&self, id: &PrinterId) -> bool {
        self.sessions.contains_key(id)
    }

    /// The entry for `id`.
    pub fn get(&self, id: &PrinterId) -> Option<&ManagedSession> {
        self.sessions.get(id)
    }

    /// A handle to the session for `id`.
    pub fn session(&self, id: &PrinterId) -> Option<Arc<DeviceSession>> {
        self.sessions.get(id).map(|entry| entry.session.clone())
    }

    /// Ids of all live sessions, in order.
    pub fn ids(&self) -> impl Iterator<Item = &PrinterId> {
        self.sessions.keys()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&PrinterId, &ManagedSession)> {
        self.sessions.iter()
    }

    /// Add an entry. An existing session for the same id is finished first.
    pub fn insert(&mut self, entry: ManagedSession) {
        let id = entry.descriptor.id.clone();
        drop(self.sessions.remove(&id));
        self.sessions.insert(id, entry);
    }

    /// Finish and remove the session for `id`. Returns whether one existed.
    pub fn remove(&mut self, id: &PrinterId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Finish and remove every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
