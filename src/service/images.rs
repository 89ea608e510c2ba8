//! Local image cache: make sure images exist before containers need them.

use crate::docker::{retry_transient, DEFAULT_RETRY_ATTEMPTS};
use crate::error::Result;
use crate::model::Service;
use crate::runtime::ContainerRuntime;
use std::collections::HashSet;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Image was already present locally.
    Present,
    Pulled,
}

/// Ensure `image_name:tag` exists locally, pulling it on a miss.
///
/// Never substitutes another tag.
pub async fn ensure_cached(
    runtime: &dyn ContainerRuntime,
    image_name: &str,
    tag: &str,
) -> Result<CacheOutcome> {
    let tag = if tag.trim().is_empty() { "latest" } else { tag.trim() };
    let image = format!("{}:{}", image_name.trim(), tag);

    let present = retry_transient("inspect image", DEFAULT_RETRY_ATTEMPTS, || {
        runtime.image_exists(&image)
    })
    .await?;
    if present {
        return Ok(CacheOutcome::Present);
    }

    info!(image = %image, "Pulling image");
    runtime.pull(&image).await?;
    info!(image = %image, "Pulled image");
    Ok(CacheOutcome::Pulled)
}

/// Result of a cache warm-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub present: Vec<String>,
    pub pulled: Vec<String>,
    /// Image and the reason it could not be cached.
    pub failed: Vec<(String, String)>,
}

impl WarmReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cache the images of every enabled service, daemons last. Each image is
/// handled once; failures are logged and reported without stopping the pass.
pub async fn warm(runtime: &dyn ContainerRuntime, services: &[Service]) -> WarmReport {
    let mut ordered: Vec<&Service> = services
        .iter()
        .filter(|s| !s.is_disabled && !s.image_name.trim().is_empty())
        .collect();
    // Stable: keeps catalogue order within each group.
    ordered.sort_by_key(|s| s.is_daemon);

    let mut report = WarmReport::default();
    let mut seen = HashSet::new();
    for service in ordered {
        let image = service.image_ref();
        if !seen.insert(image.clone()) {
            continue;
        }
        match ensure_cached(runtime, &service.image_name, &service.image_tag).await {
            Ok(CacheOutcome::Present) => report.present.push(image),
            Ok(CacheOutcome::Pulled) => report.pulled.push(image),
            Err(e) => {
                error!(
                    service_id = service.id(),
                    service = %service.name,
                    image = %image,
                    "Failed to cache image: {}",
                    e
                );
                report.failed.push((image, e.to_string()));
            }
        }
    }

    info!(
        "Image cache warm: {} present, {} pulled, {} failed",
        report.present.len(),
        report.pulled.len(),
        report.failed.len()
    );
    report
}
