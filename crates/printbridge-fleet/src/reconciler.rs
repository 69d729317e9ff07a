//! Fleet reconciliation loop.
//!
//! Every tick reports the fleet's status to the control plane, executes
//! the commands it answers with, and brings the live sessions in line
//! with the desired printer set it returns. Ticks run one at a time on
//! the reconciler's task; sessions and command tasks feed it through an
//! event channel, so no state is shared across tasks.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use base64::prelude::{Engine, BASE64_STANDARD};
use printbridge_device::{PrintStatus, SessionHooks};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::camera;
use crate::config::FleetConfig;
use crate::control::ControlPlane;
use crate::error::Result;
use crate::factory::SessionFactory;
use crate::registry::{ManagedSession, SessionRegistry};
use crate::types::{
    Command, FleetErrorCode, PrinterDescriptor, PrinterId, PrinterReport, StartPrint,
    StatusReport,
};

#[derive(Debug)]
enum FleetEvent {
    Status {
        printer_id: PrinterId,
        generation: u64,
        status: PrintStatus,
    },
    Disconnected {
        printer_id: PrinterId,
        generation: u64,
    },
    UploadFailed {
        printer_id: PrinterId,
    },
}

/// Keeps sessions in line with the control plane.
pub struct Reconciler {
    control: Arc<dyn ControlPlane>,
    factory: Arc<dyn SessionFactory>,
    config: FleetConfig,
    registry: SessionRegistry,
    statuses: BTreeMap<PrinterId, PrintStatus>,
    errors: BTreeMap<PrinterId, FleetErrorCode>,
    events_tx: UnboundedSender<FleetEvent>,
    events_rx: UnboundedReceiver<FleetEvent>,
    commands: JoinSet<()>,
    next_generation: u64,
}

impl Reconciler {
    /// Create a reconciler with no sessions.
    pub fn new(
        control: Arc<dyn ControlPlane>,
        factory: Arc<dyn SessionFactory>,
        config: FleetConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            control,
            factory,
            config,
            registry: SessionRegistry::new(),
            statuses: BTreeMap::new(),
            errors: BTreeMap::new(),
            events_tx,
            events_rx,
            commands: JoinSet::new(),
            next_generation: 0,
        }
    }

    /// Live sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Latest status per printer.
    pub fn statuses(&self) -> &BTreeMap<PrinterId, PrintStatus> {
        &self.statuses
    }

    /// Errors waiting to be reported.
    pub fn errors(&self) -> &BTreeMap<PrinterId, FleetErrorCode> {
        &self.errors
    }

    /// Fetch the initial printer set, retrying until it succeeds.
    pub async fn bootstrap(&mut self) {
        loop {
            match self.control.init().await {
                Ok(printers) => {
                    info!(printers = printers.len(), "fleet initialized");
                    for descriptor in &printers {
                        if !self.registry.contains(&descriptor.id) {
                            self.add_session(descriptor);
                        }
                    }
                    return;
                }
                Err(e) => {
                    let retry = self.config.init_retry();
                    warn!(error = %e, retry_in = ?retry, "init failed");
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }

    /// Run one update cycle.
    ///
    /// On a failed round trip nothing changes and the error is returned;
    /// the next tick retries with the same report.
    pub async fn tick(&mut self) -> Result<()> {
        self.absorb_events();

        let report = self.report();
        let response = self.control.update(&report).await?;

        // Reported errors are delivered; later failures land in the next report.
        self.errors.clear();

        debug!(
            commands = response.commands.len(),
            printers = response.printers.len(),
            "update received"
        );
        self.apply_commands(response.commands);
        self.reconcile(&response.printers);
        Ok(())
    }

    /// Apply pending session and command events.
    pub fn absorb_events(&mut self) {
        while let Some(joined) = self.commands.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "command task panicked");
                }
            }
        }

        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                FleetEvent::Status {
                    printer_id,
                    generation,
                    status,
                } => {
                    if self.is_current(&printer_id, generation) {
                        self.statuses.insert(printer_id, status);
                    }
                }
                FleetEvent::Disconnected {
                    printer_id,
                    generation,
                } => {
                    if self.is_current(&printer_id, generation) {
                        self.statuses.remove(&printer_id);
                    }
                }
                FleetEvent::UploadFailed { printer_id } => {
                    self.errors.insert(printer_id, FleetErrorCode::UploadFailed);
                }
            }
        }
    }

    /// The report the next tick would send.
    pub fn report(&self) -> StatusReport {
        let mut report = StatusReport::new();
        for (id, status) in &self.statuses {
            report.insert(
                id.clone(),
                PrinterReport {
                    status: Some(status.clone()),
                    error: self.errors.get(id).copied(),
                },
            );
        }
        for (id, error) in &self.errors {
            report.entry(id.clone()).or_insert(PrinterReport {
                status: None,
                error: Some(*error),
            });
        }
        report
    }

    /// Wait for every in-flight start command to finish.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.commands.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "command task panicked");
                }
            }
        }
    }

    /// Bootstrap, then tick every update interval until `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let bootstrapped = tokio::select! {
            _ = &mut shutdown => false,
            _ = self.bootstrap() => true,
        };

        if bootstrapped {
            let period = self.config.update_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let stop = tokio::select! {
                    _ = &mut shutdown => true,
                    _ = ticker.tick() => false,
                };
                if stop {
                    break;
                }
                if let Err(e) = self.tick().await {
                    warn!(error = %e, "update cycle failed");
                }
            }
        }

        self.shutdown();
    }

    /// Abort command tasks and finish every session.
    pub fn shutdown(&mut self) {
        self.commands.abort_all();
        let count = self.registry.len();
        self.registry.clear();
        self.statuses.clear();
        info!(sessions = count, "fleet stopped");
    }

    fn apply_commands(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Start(start) => self.start_print(start),
                Command::Stop { printer_id } => match self.registry.session(&printer_id) {
                    Some(session) => session.stop(),
                    None => warn!(printer_id = %printer_id, "stop for unknown printer"),
                },
                Command::Unsupported => debug!("ignoring unsupported command"),
            }
        }
    }

    fn start_print(&mut self, start: StartPrint) {
        let Some(session) = self.registry.session(&start.printer_id) else {
            warn!(printer_id = %start.printer_id, "start for unknown printer");
            return;
        };

        let data = match BASE64_STANDARD.decode(start.file_data.as_bytes()) {
            Ok(data) => data,
            Err(e) => {
                warn!(printer_id = %start.printer_id, error = %e, "invalid file data");
                self.errors
                    .insert(start.printer_id, FleetErrorCode::UploadFailed);
                return;
            }
        };

        let events = self.events_tx.clone();
        self.commands.spawn(async move {
            match session.upload_file(&start.file_name, data).await {
                Ok(()) => session.print(&start.file_name, &start.trays, &start.gcode_file),
                Err(e) => {
                    warn!(printer_id = %start.printer_id, file = %start.file_name, error = %e, "upload failed");
                    let _ = events.send(FleetEvent::UploadFailed {
                        printer_id: start.printer_id,
                    });
                }
            }
        });
    }

    fn reconcile(&mut self, desired: &[PrinterDescriptor]) {
        for descriptor in desired {
            let drift = self
                .registry
                .get(&descriptor.id)
                .map(|entry| entry.descriptor.drift(descriptor));

            match drift {
                None => self.add_session(descriptor),
                Some(Some(field)) => {
                    info!(printer_id = %descriptor.id, changed = %field, "printer changed, closing session");
                    self.remove_session(&descriptor.id);
                }
                Some(None) => {}
            }
        }

        let wanted: HashSet<&PrinterId> = desired.iter().map(|d| &d.id).collect();
        let stale: Vec<PrinterId> = self
            .registry
            .ids()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        for id in stale {
            info!(printer_id = %id, "printer removed");
            self.remove_session(&id);
        }
    }

    fn add_session(&mut self, descriptor: &PrinterDescriptor) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let hooks = self.hooks_for(descriptor.id.clone(), generation);

        match self.factory.open(descriptor, hooks) {
            Ok(session) => {
                let session = Arc::new(session);
                let camera = self.config.camera_enabled.then(|| {
                    camera::spawn_uploader(
                        descriptor.id.clone(),
                        session.clone(),
                        self.control.clone(),
                        self.config.camera_interval(),
                    )
                });
                info!(
                    printer_id = %descriptor.id,
                    host = %descriptor.options.host,
                    model = %descriptor.model,
                    "session opened"
                );
                self.registry.insert(ManagedSession::new(
                    descriptor.clone(),
                    session,
                    generation,
                    camera,
                ));
            }
            Err(e) => warn!(printer_id = %descriptor.id, error = %e, "failed to open session"),
        }
    }

    fn remove_session(&mut self, id: &PrinterId) {
        self.registry.remove(id);
        self.statuses.remove(id);
    }

    fn is_current(&self, id: &PrinterId, generation: u64) -> bool {
        self.registry
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn hooks_for(&self, printer_id: PrinterId, generation: u64) -> SessionHooks {
        let status_tx = self.events_tx.clone();
        let status_id = printer_id.clone();
        let disconnect_tx = self.events_tx.clone();

        SessionHooks::new(
            move |status| {
                let _ = status_tx.send(FleetEvent::Status {
                    printer_id: status_id.clone(),
                    generation,
                    status,
                });
            },
            move || {
                let _ = disconnect_tx.send(FleetEvent::Disconnected {
                    printer_id: printer_id.clone(),
                    generation,
                });
            },
        )
    }
}
