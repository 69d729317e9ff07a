//! Live protocol session with one printer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::prelude::{Engine, BASE64_STANDARD};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use crate::channel::{Channel, ChannelEvents, MqttChannel};
use crate::commands::RequestCommand;
use crate::config::{DeviceConfig, SessionSettings};
use crate::error::{DeviceError, Result};
use crate::model::{CameraKind, PrinterModel, TelemetryMode};
use crate::snapshot::{self, FfmpegExtractor, FrameExtractor};
use crate::status::{PrintStatus, Report, VersionInfo};
use crate::transfer::{FileTransfer, FtpsTransfer, TransferTarget};

/// Callback receiving normalized print status.
pub type StatusHook = Arc<dyn Fn(PrintStatus) + Send + Sync>;

/// Callback invoked when the messaging connection drops.
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks from a session into its owner.
///
/// Hooks run on the session's event task and must not block.
#[derive(Clone)]
pub struct SessionHooks {
    /// Called for every report carrying a print state.
    pub on_status: StatusHook,
    /// Called when the connection drops.
    pub on_disconnect: DisconnectHook,
}

impl SessionHooks {
    /// Create hooks from two closures.
    pub fn new(
        on_status: impl Fn(PrintStatus) + Send + Sync + 'static,
        on_disconnect: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_status: Arc::new(on_status),
            on_disconnect: Arc::new(on_disconnect),
        }
    }

    /// Hooks that ignore every event.
    pub fn noop() -> Self {
        Self::new(|_| {}, || {})
    }
}

/// Settings plus the pluggable transfer and camera backends.
#[derive(Clone)]
pub struct Capabilities {
    /// Ports, timeouts and intervals.
    pub settings: SessionSettings,
    /// File upload backend.
    pub transfer: Arc<dyn FileTransfer>,
    /// Camera stream frame extractor.
    pub extractor: Arc<dyn FrameExtractor>,
}

impl Capabilities {
    /// FTPS uploads and `ffmpeg` frame extraction.
    pub fn new(settings: SessionSettings) -> Self {
        let extractor = FfmpegExtractor::new(settings.ffmpeg_path.clone());
        Self {
            settings,
            transfer: Arc::new(FtpsTransfer),
            extractor: Arc::new(extractor),
        }
    }

    /// Replace the upload backend.
    pub fn with_transfer(mut self, transfer: Arc<dyn FileTransfer>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Replace the frame extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn FrameExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn publish(channel: &dyn Channel, topic: &str, serial: &str, command: &RequestCommand) {
    let payload = command.to_json().to_string().into_bytes();
    if let Err(e) = channel.publish(topic, payload) {
        debug!(serial, command = command.name(), error = %e, "publish dropped");
    }
}

/// State shared between the session handle and its event task.
struct SessionCore {
    config: DeviceConfig,
    request_topic: String,
    poll_interval: Duration,
    channel: Arc<dyn Channel>,
    hooks: SessionHooks,
    model: Mutex<Option<PrinterModel>>,
    poll_timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionCore {
    fn send(&self, command: RequestCommand) {
        publish(&*self.channel, &self.request_topic, &self.config.serial, &command);
    }

    fn handle_info(&self, info: VersionInfo) {
        let Some(model) = info.model() else {
            debug!(serial = %self.config.serial, "version info without ota module");
            return;
        };

        let previous = lock(&self.model).replace(model);
        if previous != Some(model) {
            info!(serial = %self.config.serial, %model, "printer model detected");
        }

        if model.telemetry() == TelemetryMode::Poll {
            self.start_poll_timer();
            self.send(RequestCommand::PushAll);
        }
    }

    /// Start the `pushall` timer unless it already runs.
    fn start_poll_timer(&self) {
        let mut timer = lock(&self.poll_timer);
        if timer.is_some() || self.closed.load(Ordering::Acquire) {
            return;
        }

        let channel = Arc::clone(&self.channel);
        let topic = self.request_topic.clone();
        let serial = self.config.serial.clone();
        let period = self.poll_interval;

        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                publish(&*channel, &topic, &serial, &RequestCommand::PushAll);
            }
        }));
    }

    fn stop_poll_timer(&self) {
        if let Some(timer) = lock(&self.poll_timer).take() {
            timer.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ChannelEvents for SessionCore {
    fn connected(&self) {
        if !self.is_closed() {
            self.send(RequestCommand::GetVersion);
        }
    }

    fn message(&self, payload: &[u8]) {
        if self.is_closed() {
            return;
        }

        match Report::decode(payload) {
            Ok(Report::Info(info)) => self.handle_info(info),
            Ok(Report::Print(status)) => (self.hooks.on_status)(status),
            Ok(Report::Unknown) => {}
            Err(e) => debug!(serial = %self.config.serial, error = %e, "ignoring report"),
        }
    }

    fn disconnected(&self) {
        self.stop_poll_timer();
        (self.hooks.on_disconnect)();
    }
}

/// Live protocol session with one printer.
///
/// Owns the messaging channel, the `pushall` timer of poll-based models,
/// and the event task. Everything is released by [`DeviceSession::finish`],
/// which also runs on drop.
pub struct DeviceSession {
    core: Arc<SessionCore>,
    capabilities: Capabilities,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Connect over MQTT and start the event task.
    ///
    /// Returns immediately; the connection is established in the
    /// background and retried until the session is finished. Must be
    /// called from within a Tokio runtime.
    pub fn connect(config: DeviceConfig, capabilities: Capabilities, hooks: SessionHooks) -> Self {
        let (channel, event_loop) = MqttChannel::new(&config, &capabilities.settings);
        let channel = Arc::new(channel);

        let session = Self::build(config, capabilities, hooks, channel.clone());
        let events: Arc<dyn ChannelEvents> = session.core.clone();
        let task = channel.spawn(event_loop, &session.core.config, &session.capabilities.settings, events);
        *lock(&session.event_task) = Some(task);

        info!(host = %session.core.config.host, serial = %session.core.config.serial, "session started");
        session
    }

    /// Create a session over an existing channel.
    ///
    /// Inbound events are fed through [`handle_connected`](Self::handle_connected),
    /// [`handle_message`](Self::handle_message) and
    /// [`handle_disconnect`](Self::handle_disconnect).
    pub fn with_channel(
        config: DeviceConfig,
        capabilities: Capabilities,
        hooks: SessionHooks,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self::build(config, capabilities, hooks, channel)
    }

    fn build(
        config: DeviceConfig,
        capabilities: Capabilities,
        hooks: SessionHooks,
        channel: Arc<dyn Channel>,
    ) -> Self {
        let core = SessionCore {
            request_topic: config.request_topic(),
            poll_interval: capabilities.settings.poll_interval(),
            config,
            channel,
            hooks,
            model: Mutex::new(None),
            poll_timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        Self {
            core: Arc::new(core),
            capabilities,
            event_task: Mutex::new(None),
        }
    }

    /// Connection configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.core.config
    }

    /// Model reported by the printer, once it answered `get_version`.
    pub fn detected_model(&self) -> Option<PrinterModel> {
        *lock(&self.core.model)
    }

    /// Detected model, falling back to the configured hint.
    pub fn model(&self) -> Option<PrinterModel> {
        self.detected_model().or_else(|| {
            self.core
                .config
                .model_hint
                .as_deref()
                .and_then(|hint| hint.parse().ok())
        })
    }

    /// Whether the `pushall` timer is running.
    pub fn is_polling(&self) -> bool {
        lock(&self.core.poll_timer).is_some()
    }

    /// Whether [`finish`](Self::finish) has run.
    pub fn is_finished(&self) -> bool {
        self.core.is_closed()
    }

    /// The connection was (re)established.
    pub fn handle_connected(&self) {
        self.core.connected();
    }

    /// A message arrived on the report topic.
    pub fn handle_message(&self, payload: &[u8]) {
        self.core.message(payload);
    }

    /// The connection dropped. Safe to call repeatedly.
    pub fn handle_disconnect(&self) {
        self.core.disconnected();
    }

    /// Ask for module versions. Best effort.
    pub fn request_version(&self) {
        self.core.send(RequestCommand::GetVersion);
    }

    /// Ask for a full status push. Best effort.
    pub fn request_push_all(&self) {
        self.core.send(RequestCommand::PushAll);
    }

    /// Start printing an uploaded file. Best effort.
    ///
    /// There is no acknowledgement; success shows up in later telemetry.
    pub fn print(&self, file_name: &str, ams_mapping: &[i32], param: &str) {
        info!(serial = %self.core.config.serial, file = file_name, "starting print");
        self.core.send(RequestCommand::ProjectFile {
            file_name: file_name.to_string(),
            param: param.to_string(),
            ams_mapping: ams_mapping.to_vec(),
        });
    }

    /// Stop the current print. Best effort.
    pub fn stop(&self) {
        info!(serial = %self.core.config.serial, "stopping print");
        self.core.send(RequestCommand::Stop);
    }

    /// Upload a file to the printer's storage root.
    pub async fn upload_file(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let settings = &self.capabilities.settings;
        let target = TransferTarget {
            host: self.core.config.host.clone(),
            port: settings.ftp_port,
            username: settings.username.clone(),
            password: self.core.config.access_code.clone(),
            timeout: settings.upload_timeout(),
        };

        info!(serial = %self.core.config.serial, file = name, bytes = data.len(), "uploading file");
        self.capabilities
            .transfer
            .upload(&target, name, data)
            .await
            .map_err(|e| match e {
                DeviceError::Upload(_) => e,
                other => DeviceError::Upload(other.to_string()),
            })
    }

    /// RTSPS URL of the camera stream, credentials included.
    pub fn stream_url(&self) -> String {
        let config = &self.core.config;
        format!(
            "rtsps://{}:{}@{}:{}/streaming/live/1",
            self.capabilities.settings.username,
            config.access_code,
            config.host,
            self.capabilities.settings.rtsp_port
        )
    }

    /// Capture the current camera image as base64-encoded JPEG.
    ///
    /// Returns `Ok(None)` when the model is unknown.
    pub async fn current_image(&self) -> Result<Option<String>> {
        let Some(model) = self.model() else {
            return Ok(None);
        };

        let settings = &self.capabilities.settings;
        let config = &self.core.config;

        let image = match model.camera() {
            CameraKind::Static => {
                snapshot::capture_static(&config.host, &config.access_code, settings).await?
            }
            CameraKind::Stream => {
                let deadline = settings.extract_timeout();
                let url = self.stream_url();
                tokio::time::timeout(deadline, self.capabilities.extractor.extract_frame(&url, deadline))
                    .await
                    .map_err(|_| DeviceError::Timeout(format!("no frame within {deadline:?}")))??
            }
        };

        Ok(Some(BASE64_STANDARD.encode(image)))
    }

    /// Stop the poll timer and the event task, and close the channel.
    ///
    /// Idempotent.
    pub fn finish(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.core.stop_poll_timer();
        if let Some(task) = lock(&self.event_task).take() {
            task.abort();
        }
        self.core.channel.close();

        debug!(serial = %self.core.config.serial, "session finished");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("host", &self.core.config.host)
            .field("serial", &self.core.config.serial)
            .field("model", &self.model())
            .field("finished", &self.is_finished())
            .finish()
    }
}
