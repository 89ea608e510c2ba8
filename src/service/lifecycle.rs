//! Idempotent start/stop/restart of catalogue services.

use super::images::ensure_cached;
use super::locator::locate;
use super::translate::build_run_spec;
use crate::docker::DockerError;
use crate::error::{Error, Result};
use crate::model::{RuntimeState, Service};
use crate::notify::Notifier;
use crate::runtime::{split_image_ref, ContainerHandle, ContainerRuntime, RuntimeEvent};
use crate::state::SqliteServiceStore;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What `start` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Already marked running; nothing was touched.
    AlreadyRunning,
    /// Found a running container and adopted it.
    Attached { container_id: String },
    /// Found a stopped container and started it.
    Resumed { container_id: String },
    /// No container existed; created one.
    Created { container_id: String },
}

impl StartOutcome {
    pub fn container_id(&self) -> Option<&str> {
        match self {
            StartOutcome::AlreadyRunning => None,
            StartOutcome::Attached { container_id }
            | StartOutcome::Resumed { container_id }
            | StartOutcome::Created { container_id } => Some(container_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Not marked running; nothing to stop.
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted { container_id: String },
    /// No container to restart, so the service was started instead.
    Started(StartOutcome),
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::AlreadyRunning => write!(f, "already running"),
            StartOutcome::Attached { container_id } => {
                write!(f, "attached to running container {}", short_id(container_id))
            }
            StartOutcome::Resumed { container_id } => {
                write!(f, "started existing container {}", short_id(container_id))
            }
            StartOutcome::Created { container_id } => {
                write!(f, "created container {}", short_id(container_id))
            }
        }
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped => write!(f, "stopped"),
            StopOutcome::NotRunning => write!(f, "not running"),
        }
    }
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartOutcome::Restarted { container_id } => {
                write!(f, "restarted container {}", short_id(container_id))
            }
            RestartOutcome::Started(outcome) => write!(f, "{}", outcome),
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Drives services through the container runtime and keeps the store in step.
///
/// Calls for one service should not overlap; different services are
/// independent.
#[derive(Clone)]
pub struct ServiceController {
    runtime: Arc<dyn ContainerRuntime>,
    store: SqliteServiceStore,
    notifier: Arc<dyn Notifier>,
}

impl ServiceController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: SqliteServiceStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            runtime,
            store,
            notifier,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn store(&self) -> &SqliteServiceStore {
        &self.store
    }

    /// Load a service by id.
    pub async fn load(&self, service_id: i64) -> Result<Service> {
        self.store
            .get(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))
    }

    /// Load a service and locate its container.
    pub async fn find(&self, service_id: i64) -> Result<(Service, Option<ContainerHandle>)> {
        let mut service = self.load(service_id).await?;
        let handle = self.locate(&mut service).await?;
        Ok((service, handle))
    }

    pub async fn locate(&self, service: &mut Service) -> Result<Option<ContainerHandle>> {
        locate(self.runtime.as_ref(), &self.store, service).await
    }

    /// Bring a service up, reusing an existing container when there is one.
    pub async fn start(&self, service: &mut Service) -> Result<StartOutcome> {
        let result = self.start_inner(service).await;
        match &result {
            Ok(outcome) => info!(
                service_id = service.id(),
                service = %service.name,
                "Start: {}",
                outcome
            ),
            Err(e) => error!(
                service_id = service.id(),
                service = %service.name,
                "Failed to start: {}",
                e
            ),
        }
        result
    }

    async fn start_inner(&self, service: &mut Service) -> Result<StartOutcome> {
        if service.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(handle) = self.locate(service).await? {
            if handle.is_running() {
                // locate already persisted Running for this container
                return Ok(StartOutcome::Attached {
                    container_id: handle.id,
                });
            }
            self.runtime.start(&handle.id).await?;
            self.store
                .record_runtime_state(service, RuntimeState::running(handle.id.clone()))
                .await?;
            return Ok(StartOutcome::Resumed {
                container_id: handle.id,
            });
        }

        let spec = build_run_spec(service)?;
        ensure_cached(self.runtime.as_ref(), &service.image_name, &service.image_tag).await?;
        let container_id = self.runtime.run(&spec).await?;
        self.store
            .record_runtime_state(service, RuntimeState::running(container_id.clone()))
            .await?;
        Ok(StartOutcome::Created { container_id })
    }

    /// Stop and remove a service's container.
    pub async fn stop(&self, service: &mut Service) -> Result<StopOutcome> {
        let result = self.stop_inner(service).await;
        match &result {
            Ok(outcome) => info!(
                service_id = service.id(),
                service = %service.name,
                "Stop: {}",
                outcome
            ),
            Err(e) => error!(
                service_id = service.id(),
                service = %service.name,
                "Failed to stop: {}",
                e
            ),
        }
        result
    }

    async fn stop_inner(&self, service: &mut Service) -> Result<StopOutcome> {
        if !service.is_running() {
            return Ok(StopOutcome::NotRunning);
        }
        let reference = service.container_reference().map(str::to_string);

        let Some(handle) = self.locate(service).await? else {
            self.store
                .record_runtime_state(service, RuntimeState::Stopped)
                .await?;
            return Err(Error::ContainerNotFound {
                service: service.name.clone(),
                reference,
            });
        };

        if handle.is_running() {
            tolerate_gone(self.runtime.stop(&handle.id).await)?;
        }
        tolerate_gone(self.runtime.remove(&handle.id).await)?;
        self.store
            .record_runtime_state(service, RuntimeState::Stopped)
            .await?;
        Ok(StopOutcome::Stopped)
    }

    /// Restart a service's container, or start it when there is none.
    pub async fn restart(&self, service: &mut Service) -> Result<RestartOutcome> {
        if service.container_reference().is_none() {
            debug!(service_id = service.id(), "No container reference, starting instead");
            return Ok(RestartOutcome::Started(self.start(service).await?));
        }

        let handle = match self.locate(service).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    service_id = service.id(),
                    service = %service.name,
                    "Failed to restart: {}",
                    e
                );
                return Err(e);
            }
        };

        match handle {
            Some(handle) => {
                if let Err(e) = self.runtime.restart(&handle.id).await {
                    error!(
                        service_id = service.id(),
                        service = %service.name,
                        "Failed to restart: {}",
                        e
                    );
                    return Err(e.into());
                }
                self.store
                    .record_runtime_state(service, RuntimeState::running(handle.id.clone()))
                    .await?;
                info!(
                    service_id = service.id(),
                    service = %service.name,
                    container = %handle.id,
                    "Restarted"
                );
                Ok(RestartOutcome::Restarted {
                    container_id: handle.id,
                })
            }
            None => Ok(RestartOutcome::Started(self.start(service).await?)),
        }
    }

    /// Reconcile one runtime event into the owning service's state.
    ///
    /// The owner is the service holding the event's container reference, or
    /// failing that a service built from the same image: for `start` one whose
    /// reference is empty or equal, for stop-class events one with no
    /// reference. Events nobody owns are ignored. Returns the updated service.
    pub async fn handle_runtime_event(
        &self,
        event: &RuntimeEvent,
        container: Option<&ContainerHandle>,
    ) -> Result<Option<Service>> {
        let Some(mut service) = self.event_owner(event, container).await? else {
            debug!(
                container = %event.container_id,
                action = %event.action,
                "Ignoring event for unmanaged container"
            );
            return Ok(None);
        };

        let state = if event.action.is_running() {
            RuntimeState::running(event.container_id.clone())
        } else {
            RuntimeState::Stopped
        };
        self.store.record_runtime_state(&mut service, state).await?;

        info!(
            service_id = service.id(),
            service = %service.name,
            container = %event.container_id,
            "Container {}",
            event.action
        );
        self.notifier.emit(
            "service_status",
            json!({
                "service_id": service.id(),
                "status": event.action.as_str(),
                "is_running": service.is_running(),
            }),
        );
        Ok(Some(service))
    }

    async fn event_owner(
        &self,
        event: &RuntimeEvent,
        container: Option<&ContainerHandle>,
    ) -> Result<Option<Service>> {
        if let Some(service) = self
            .store
            .find_by_container_reference(&event.container_id)
            .await?
        {
            return Ok(Some(service));
        }

        let image = container
            .and_then(|c| c.image_tags.first().cloned())
            .or_else(|| event.image.clone());
        let Some(image) = image else {
            return Ok(None);
        };

        let (name, tag) = split_image_ref(&image);
        let candidates = self.store.find_by_image(&name, &tag).await?;
        Ok(candidates.into_iter().find(|s| match s.container_reference() {
            None => true,
            Some(reference) => event.action.is_running() && reference == event.container_id,
        }))
    }
}

/// A container that vanished while being stopped is as good as stopped.
fn tolerate_gone(result: std::result::Result<(), DockerError>) -> Result<()> {
    match result {
        Err(e) if e.is_container_not_found() => Ok(()),
        other => other.map_err(Error::from),
    }
}
