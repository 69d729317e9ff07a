//! Camera snapshot capture.
//!
//! Two strategies exist. P1 and A1 printers serve JPEG stills on a
//! framed TLS socket ([`capture_static`]). X1 printers only offer an
//! RTSPS stream, from which a [`FrameExtractor`] pulls one frame.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::tokio_rustls::TlsConnector;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::SessionSettings;
use crate::error::{DeviceError, Result};
use crate::frame::{encode_auth_frame, FrameDecoder, HEADER_LEN};
use crate::tls;

const READ_CHUNK: usize = 64 * 1024;

/// Pulls a single JPEG frame from a camera stream.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Return exactly one JPEG frame from `url`, or fail within `deadline`.
    async fn extract_frame(&self, url: &str, deadline: Duration) -> Result<Vec<u8>>;
}

/// [`FrameExtractor`] running an `ffmpeg` process per frame.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: PathBuf,
}

impl FfmpegExtractor {
    /// Use the given `ffmpeg` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frame(&self, url: &str, deadline: Duration) -> Result<Vec<u8>> {
        let child = Command::new(&self.program)
            .args(["-loglevel", "error", "-rtsp_transport", "tcp", "-timeout", "5000000"])
            .args(["-i", url])
            .args(["-frames:v", "1", "-q:v", "2", "-f", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeviceError::connection(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        // On timeout the child is dropped, which kills it.
        let output = timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| DeviceError::Timeout(format!("no frame within {deadline:?}")))??;

        if !output.status.success() {
            return Err(DeviceError::connection(format!(
                "frame extractor exited with {}",
                output.status
            )));
        }
        if output.stdout.is_empty() {
            return Err(DeviceError::protocol("frame extractor produced no data"));
        }

        Ok(output.stdout)
    }
}

/// Fetch one still from the printer's snapshot socket.
pub async fn capture_static(
    host: &str,
    access_code: &str,
    settings: &SessionSettings,
) -> Result<Vec<u8>> {
    let auth = encode_auth_frame(&settings.username, access_code)?;
    let read_timeout = settings.snapshot_read_timeout();

    let tcp = timeout(read_timeout, TcpStream::connect((host, settings.snapshot_port)))
        .await
        .map_err(|_| DeviceError::Timeout(format!("connecting to {host}")))?
        .map_err(|e| DeviceError::connection(format!("{host}: {e}")))?;

    let connector = TlsConnector::from(tls::printer_client_config());
    let stream = timeout(read_timeout, connector.connect(tls::server_name(host)?, tcp))
        .await
        .map_err(|_| DeviceError::Timeout(format!("TLS handshake with {host}")))?
        .map_err(|e| DeviceError::connection(format!("TLS handshake with {host}: {e}")))?;

    read_snapshot(stream, &auth, read_timeout).await
}

/// Authenticate on an open snapshot stream and read one image.
///
/// The stream is shut down before returning, whatever the outcome.
pub async fn read_snapshot<S>(mut stream: S, auth: &[u8], read_timeout: Duration) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = exchange(&mut stream, auth, read_timeout).await;
    let _ = stream.shutdown().await;
    result
}

async fn exchange<S>(stream: &mut S, auth: &[u8], read_timeout: Duration) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(auth)
        .await
        .map_err(|e| DeviceError::connection(format!("sending auth frame: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| DeviceError::connection(format!("sending auth frame: {e}")))?;

    let mut decoder = FrameDecoder::new();

    // TLS may coalesce the header with payload bytes, so read it exactly.
    let mut header = [0u8; HEADER_LEN];
    timeout(read_timeout, stream.read_exact(&mut header))
        .await
        .map_err(|_| DeviceError::Timeout("waiting for frame header".into()))?
        .map_err(|e| DeviceError::connection(format!("reading frame header: {e}")))?;
    decoder.push(&header)?;

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = timeout(read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| DeviceError::Timeout("waiting for image data".into()))?
            .map_err(|e| DeviceError::connection(format!("reading image data: {e}")))?;

        if n == 0 {
            return Err(DeviceError::connection(
                "connection closed before image was complete",
            ));
        }

        if let Some(image) = decoder.push(&buf[..n])? {
            debug!(bytes = image.len(), "snapshot received");
            return Ok(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AUTH_FRAME_LEN, JPEG_EOI, JPEG_SOI};
    use tokio_test::io::Builder;

    fn header(length: usize) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&(length as u32).to_le_bytes());
        header
    }

    fn jpeg() -> Vec<u8> {
        let mut image = JPEG_SOI.to_vec();
        image.extend_from_slice(b"pixels");
        image.extend_from_slice(&JPEG_EOI);
        image
    }

    #[tokio::test]
    async fn test_read_snapshot() {
        let auth = encode_auth_frame("bblp", "12345678").unwrap();
        let image = jpeg();
        let (first, second) = image.split_at(5);

        let stream = Builder::new()
            .write(&auth)
            .read(&header(image.len()))
            .read(first)
            .read(second)
            .build();

        let result = read_snapshot(stream, &auth, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, image);
        assert_eq!(auth.len(), AUTH_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_read_snapshot_bad_markers() {
        let auth = encode_auth_frame("bblp", "12345678").unwrap();
        let payload = b"not a jpeg at all".to_vec();

        let stream = Builder::new()
            .write(&auth)
            .read(&header(payload.len()))
            .read(&payload)
            .build();

        let err = read_snapshot(stream, &auth, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_snapshot_closed_early() {
        let auth = encode_auth_frame("bblp", "12345678").unwrap();
        let image = jpeg();

        let stream = Builder::new()
            .write(&auth)
            .read(&header(image.len()))
            .read(&image[..4])
            .build();

        let err = read_snapshot(stream, &auth, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }

    #[tokio::test]
    async fn test_ffmpeg_missing_binary() {
        let extractor = FfmpegExtractor::new("/nonexistent/ffmpeg");
        let err = extractor
            .extract_frame("rtsps://bblp:x@127.0.0.1:322/streaming/live/1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }
}
