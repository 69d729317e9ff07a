//! File upload to printer storage.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};
use tracing::debug;

use crate::error::{DeviceError, Result};

/// Where to upload and with which credentials.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    /// Printer host.
    pub host: String,
    /// FTPS port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password (the printer access code).
    pub password: String,
    /// Idle timeout for each socket operation.
    pub timeout: Duration,
}

/// Uploads files to a printer.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Store `data` under `name` in the printer's storage root.
    async fn upload(&self, target: &TransferTarget, name: &str, data: Vec<u8>) -> Result<()>;
}

/// Implicit FTPS upload.
///
/// Printers serve implicit TLS with a self-signed certificate, so
/// certificate and host name validation are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpsTransfer;

#[async_trait]
impl FileTransfer for FtpsTransfer {
    async fn upload(&self, target: &TransferTarget, name: &str, data: Vec<u8>) -> Result<()> {
        let deadline = target.timeout;
        let target = target.clone();
        let name = name.to_string();

        let task = tokio::task::spawn_blocking(move || upload_blocking(&target, &name, data));
        match tokio::time::timeout(deadline, task).await {
            Ok(joined) => {
                joined.map_err(|e| DeviceError::Upload(format!("upload task failed: {e}")))?
            }
            // The blocking thread ends on its own once a socket timeout or the peer closes.
            Err(_) => Err(DeviceError::Upload(format!(
                "upload did not finish within {deadline:?}"
            ))),
        }
    }
}

fn upload_blocking(target: &TransferTarget, name: &str, data: Vec<u8>) -> Result<()> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| DeviceError::Upload(format!("TLS setup failed: {e}")))?;

    let mut ftp = NativeTlsFtpStream::connect_secure_implicit(
        (target.host.as_str(), target.port),
        NativeTlsConnector::from(tls),
        &target.host,
    )
    .map_err(upload_error)?;

    let socket = ftp.get_ref();
    socket
        .set_read_timeout(Some(target.timeout))
        .and_then(|()| socket.set_write_timeout(Some(target.timeout)))
        .map_err(|e| DeviceError::Upload(e.to_string()))?;

    ftp.login(&target.username, &target.password)
        .map_err(upload_error)?;
    ftp.transfer_type(FileType::Binary).map_err(upload_error)?;

    let size = data.len();
    ftp.put_file(name, &mut Cursor::new(data))
        .map_err(upload_error)?;
    debug!(host = %target.host, file = name, bytes = size, "upload complete");

    // The file is stored once put_file returns; a failed QUIT changes nothing.
    let _ = ftp.quit();
    Ok(())
}

fn upload_error(e: suppaftp::FtpError) -> DeviceError {
    DeviceError::Upload(e.to_string())
}
