//! Periodic camera upload for one printer.

use std::sync::Arc;
use std::time::Duration;

use printbridge_device::DeviceSession;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::control::ControlPlane;
use crate::types::PrinterId;

/// Spawn a task uploading one camera image per `interval`.
///
/// Each capture and upload finishes before the next wait starts, so a
/// slow camera never stacks requests. Failures are logged and skipped.
pub(crate) fn spawn_uploader(
    printer_id: PrinterId,
    session: Arc<DeviceSession>,
    control: Arc<dyn ControlPlane>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if session.is_finished() {
                return;
            }

            match session.current_image().await {
                Ok(Some(image)) => {
                    if let Err(e) = control.upload_image(&printer_id, &image).await {
                        debug!(printer_id = %printer_id, error = %e, "camera upload failed");
                    }
                }
                Ok(None) => debug!(printer_id = %printer_id, "model unknown, no camera image"),
                Err(e) => debug!(printer_id = %printer_id, error = %e, "camera capture failed"),
            }
        }
    })
}
