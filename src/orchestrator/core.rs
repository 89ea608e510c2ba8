use super::daemons::{supervise_daemons, DaemonReport};
use super::events::spawn_event_loop;
use crate::error::Result;
use crate::model::{Service, ServiceSpec};
use crate::notify::Notifier;
use crate::runtime::ContainerRuntime;
use crate::service::{warm, ServiceController, WarmReport};
use crate::state::{ServiceFilter, SqliteServiceStore};
use crate::streaming::{relay, stream_logs, stream_stats, StreamFlag, StreamKind, StreamRegistry};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default pause between two statistics samples.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// The application core: store, runtime, notifier and stream flags wired
/// together, plus the boot sequence.
///
/// # Concurrency Model
///
/// - Every method takes `&self`; share it behind an `Arc`
/// - The event loop and stream relays run as independent tokio tasks
/// - [`MissionControl::shutdown`] cancels the event loop and clears every
///   stream flag
///
/// # Example
///
/// ```no_run
/// use mission_control::docker::DockerClient;
/// use mission_control::notify::BroadcastNotifier;
/// use mission_control::state::SqliteServiceStore;
/// use mission_control::MissionControl;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), mission_control::Error> {
/// let store = SqliteServiceStore::new("mission-control.db").await?;
/// let app = MissionControl::new(
///     Arc::new(DockerClient::new()),
///     store,
///     Arc::new(BroadcastNotifier::default()),
/// )
/// .await?;
/// let report = app.boot().await;
/// println!("{}", report.daemons);
/// app.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct MissionControl {
    controller: ServiceController,
    notifier: Arc<dyn Notifier>,
    streams: StreamRegistry,
    stats_interval: Duration,
    cancellation_token: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of [`MissionControl::boot`].
#[derive(Debug, Default)]
pub struct BootReport {
    pub images: WarmReport,
    pub daemons: DaemonReport,
}

impl MissionControl {
    /// Wire the core together. Creates the schema if needed.
    pub async fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: SqliteServiceStore,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        store.initialize().await?;
        Ok(Self {
            controller: ServiceController::new(runtime, store, Arc::clone(&notifier)),
            notifier,
            streams: StreamRegistry::new(),
            stats_interval: DEFAULT_STATS_INTERVAL,
            cancellation_token: CancellationToken::new(),
            event_loop: Mutex::new(None),
        })
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn controller(&self) -> &ServiceController {
        &self.controller
    }

    pub fn store(&self) -> &SqliteServiceStore {
        self.controller.store()
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Token cancelled on shutdown, for tasks that should stop with us.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    /// Insert the given catalogue. With `replace`, existing services are
    /// removed first.
    pub async fn seed(&self, specs: Vec<ServiceSpec>, replace: bool) -> Result<Vec<Service>> {
        if replace {
            self.store().clear().await?;
        }
        let mut seeded = Vec::with_capacity(specs.len());
        for spec in specs {
            let service = self.store().insert(spec).await?;
            tracing::info!(service_id = service.id(), service = %service.name, "Seeded service");
            seeded.push(service);
        }
        Ok(seeded)
    }

    /// Make sure every enabled service's image is present locally.
    pub async fn warm_images(&self) -> Result<WarmReport> {
        let services = self.store().list(ServiceFilter::enabled()).await?;
        Ok(warm(self.controller.runtime().as_ref(), &services).await)
    }

    /// Boot sequence: warm the image cache, supervise daemons, then start the
    /// event loop. Failures in the first two steps are logged and reported
    /// but never abort boot.
    pub async fn boot(&self) -> BootReport {
        let images = match self.warm_images().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Image cache warm-up failed: {}", e);
                WarmReport::default()
            }
        };

        let daemons = match supervise_daemons(&self.controller).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Daemon supervision failed: {}", e);
                DaemonReport::default()
            }
        };

        self.spawn_event_loop();
        BootReport { images, daemons }
    }

    /// Start the event loop unless it is already running.
    pub fn spawn_event_loop(&self) {
        let mut slot = self.event_loop.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *slot = Some(spawn_event_loop(
            self.controller.clone(),
            self.cancellation_token.child_token(),
        ));
    }

    /// Begin relaying a service's log lines as `log_message` events.
    ///
    /// Replaces any log stream already running for the service. Fails with
    /// `ContainerNotFound` when the service has no container.
    pub fn start_log_stream(&self, service: &Service) -> Result<JoinHandle<usize>> {
        let flag = self.streams.enable(service.id(), StreamKind::Logs);
        let stream = match stream_logs(Arc::clone(self.controller.runtime()), service, flag.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                self.streams.release(service.id(), StreamKind::Logs, &flag);
                return Err(e);
            }
        };
        tracing::info!(service_id = service.id(), "Streaming logs");
        Ok(self.spawn_relay(stream, StreamKind::Logs, service.id(), flag))
    }

    /// Begin relaying a service's resource usage as `stats_message` events.
    pub fn start_stats_stream(&self, service: &Service) -> Result<JoinHandle<usize>> {
        let flag = self.streams.enable(service.id(), StreamKind::Stats);
        let stream = match stream_stats(
            Arc::clone(self.controller.runtime()),
            service,
            flag.clone(),
            self.stats_interval,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                self.streams.release(service.id(), StreamKind::Stats, &flag);
                return Err(e);
            }
        };
        tracing::info!(service_id = service.id(), "Streaming stats");
        Ok(self.spawn_relay(stream, StreamKind::Stats, service.id(), flag))
    }

    /// Relay `stream` on its own task. Once the stream ends, for whatever
    /// reason, its flag is dropped from the registry.
    fn spawn_relay<T>(
        &self,
        stream: BoxStream<'static, Result<T>>,
        kind: StreamKind,
        service_id: i64,
        flag: StreamFlag,
    ) -> JoinHandle<usize>
    where
        T: Serialize + Send + 'static,
    {
        let streams = self.streams.clone();
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let relayed = relay(stream, kind, service_id, notifier).await;
            streams.release(service_id, kind, &flag);
            relayed
        })
    }

    /// Clear a stream flag. The relay ends at its next pull.
    pub fn stop_stream(&self, service_id: i64, kind: StreamKind) -> bool {
        self.streams.disable(service_id, kind)
    }

    /// Cancel the event loop and every stream, then wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.streams.disable_all();
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Event loop task failed: {}", e);
            }
        }
    }
}
