//! Resolve a service to a concrete container.

use crate::docker::{retry_transient, DEFAULT_RETRY_ATTEMPTS};
use crate::error::Result;
use crate::model::{RuntimeState, Service};
use crate::runtime::{ContainerHandle, ContainerRuntime};
use crate::state::SqliteServiceStore;
use tracing::{debug, info};

/// Find the container backing `service`.
///
/// Looks the stored container reference up directly; when that container is
/// gone the stale state is cleared and the search falls back, once, to the
/// first container running the service's exact `image:tag` that no other
/// service holds as its reference. Whatever is found has its actual state
/// persisted. Only transport failures that outlast the retries are returned
/// as errors.
pub async fn locate(
    runtime: &dyn ContainerRuntime,
    store: &SqliteServiceStore,
    service: &mut Service,
) -> Result<Option<ContainerHandle>> {
    if let Some(reference) = service.container_reference().map(str::to_string) {
        let found = retry_transient("inspect container", DEFAULT_RETRY_ATTEMPTS, || {
            runtime.get(&reference)
        })
        .await?;

        if let Some(handle) = found {
            persist_observed(store, service, &handle).await?;
            return Ok(Some(handle));
        }

        info!(
            service_id = service.id(),
            service = %service.name,
            container = %reference,
            "Stored container no longer exists, clearing runtime state"
        );
        store
            .record_runtime_state(service, RuntimeState::Stopped)
            .await?;
    }

    let image = service.image_ref();
    let containers = retry_transient("list containers", DEFAULT_RETRY_ATTEMPTS, || {
        runtime.list()
    })
    .await?;

    let mut matched = None;
    for candidate in containers.into_iter().filter(|c| c.has_image(&image)) {
        // A container another service already holds is never adopted.
        if let Some(owner) = store.find_by_container_reference(&candidate.id).await? {
            if owner.id() != service.id() {
                debug!(
                    service_id = service.id(),
                    owner_id = owner.id(),
                    container = %candidate.id,
                    "Skipping container held by another service"
                );
                continue;
            }
        }
        matched = Some(candidate);
        break;
    }

    match matched {
        Some(handle) => {
            debug!(
                service_id = service.id(),
                container = %handle.id,
                image = %image,
                "Matched container by image"
            );
            persist_observed(store, service, &handle).await?;
            Ok(Some(handle))
        }
        None => {
            debug!(service_id = service.id(), image = %image, "No container found");
            Ok(None)
        }
    }
}

/// Record what the runtime reports. A stopped container is not a confirmed
/// live container, so it leaves no reference behind.
async fn persist_observed(
    store: &SqliteServiceStore,
    service: &mut Service,
    handle: &ContainerHandle,
) -> Result<()> {
    let state = if handle.is_running() {
        RuntimeState::running(handle.id.clone())
    } else {
        RuntimeState::Stopped
    };
    store.record_runtime_state(service, state).await
}
