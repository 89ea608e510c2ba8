//! Conversion of declared service attributes into runtime parameters.
//!
//! Everything here is pure: no runtime calls, no persistence.

use crate::error::{Error, Result};
use crate::model::{DeviceMapping, Healthcheck, Label, PortMapping, Service, VolumeMapping};
use crate::runtime::{HealthcheckSpec, RestartPolicy, RunSpec};
use std::collections::BTreeMap;

/// Label marking containers created by mission-control.
pub const MANAGED_LABEL: &str = "com.mission-control.managed";
/// Label carrying the owning service id.
pub const SERVICE_LABEL: &str = "com.mission-control.service";

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Whether a volume source names a Docker volume rather than a host path.
///
/// Bind mounts start with `.`, `/` or `~`, or contain a path separator.
pub fn is_named_volume(source: &str) -> bool {
    !source.is_empty()
        && !(source.starts_with('.')
            || source.starts_with('/')
            || source.starts_with('~')
            || source.contains('/')
            || source.contains('\\'))
}

/// Normalize a host path: expand a leading `~` to the home directory and drop
/// trailing slashes. Named volumes are returned unchanged.
pub fn normalize_host_path(path: &str) -> String {
    let path = path.trim();
    if is_named_volume(path) {
        return path.to_string();
    }

    let expanded = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{}", home.display(), rest),
            None => path.to_string(),
        },
        _ => path.to_string(),
    };

    let trimmed = expanded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `host:container` mount spec for a volume mapping.
pub fn volume_spec(volume: &VolumeMapping) -> Result<String> {
    let container = volume.container_path.trim();
    if volume.host_path.trim().is_empty() {
        return Err(Error::Config(format!(
            "Volume for '{}' has an empty host path",
            container
        )));
    }
    if !container.starts_with('/') {
        return Err(Error::Config(format!(
            "Container path must be absolute in volume '{}:{}'",
            volume.host_path, volume.container_path
        )));
    }
    let container = match container.trim_end_matches('/') {
        "" => "/",
        path => path,
    };
    Ok(format!(
        "{}:{}",
        normalize_host_path(&volume.host_path),
        container
    ))
}

/// Port map keyed by `"<container_port>/tcp"`. Later mappings for the same
/// container port win.
pub fn port_map<'a>(ports: impl IntoIterator<Item = &'a PortMapping>) -> BTreeMap<String, u16> {
    ports
        .into_iter()
        .map(|p| (format!("{}/tcp", p.container_port), p.host_port))
        .collect()
}

/// Validate cgroup permissions: a non-empty subset of `rwm` without repeats.
/// An empty string means read-only.
pub fn device_permissions(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok("r".to_string());
    }
    let mut seen = String::new();
    for c in raw.chars() {
        if !matches!(c, 'r' | 'w' | 'm') || seen.contains(c) {
            return Err(Error::Config(format!(
                "Invalid device permissions '{}' (expected a combination of r, w, m)",
                raw
            )));
        }
        seen.push(c);
    }
    Ok(seen)
}

/// `host:container:permissions` device spec. An empty container path mirrors
/// the host path.
pub fn device_spec(device: &DeviceMapping) -> Result<String> {
    let host = normalize_host_path(&device.host_path);
    if host.is_empty() || !host.starts_with('/') {
        return Err(Error::Config(format!(
            "Device host path must be absolute: '{}'",
            device.host_path
        )));
    }
    let container = match device.container_path.trim() {
        "" => host.clone(),
        path => path.to_string(),
    };
    Ok(format!(
        "{}:{}:{}",
        host,
        container,
        device_permissions(&device.permissions)?
    ))
}

/// Declared labels plus the managed labels. Managed keys cannot be overridden.
pub fn label_map<'a>(
    labels: impl IntoIterator<Item = &'a Label>,
    service_id: i64,
) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = labels
        .into_iter()
        .map(|l| (l.key.clone(), l.value.clone()))
        .collect();
    map.insert(MANAGED_LABEL.to_string(), "true".to_string());
    map.insert(SERVICE_LABEL.to_string(), service_id.to_string());
    map
}

fn seconds_to_nanos(seconds: u64) -> u64 {
    seconds.saturating_mul(NANOS_PER_SECOND)
}

/// Healthcheck in runtime units. The test runs through the container shell.
pub fn healthcheck_spec(healthcheck: &Healthcheck) -> HealthcheckSpec {
    HealthcheckSpec {
        test: vec!["CMD-SHELL".to_string(), healthcheck.test.clone()],
        interval_ns: seconds_to_nanos(healthcheck.interval),
        timeout_ns: seconds_to_nanos(healthcheck.timeout),
        start_period_ns: seconds_to_nanos(healthcheck.start_period),
        retries: healthcheck.retries,
    }
}

/// Everything the runtime needs to create this service's container.
pub fn build_run_spec(service: &Service) -> Result<RunSpec> {
    let volumes = service
        .volumes
        .iter()
        .map(|v| volume_spec(v))
        .collect::<Result<Vec<_>>>()?;
    let devices = service
        .devices
        .iter()
        .map(|d| device_spec(d))
        .collect::<Result<Vec<_>>>()?;

    Ok(RunSpec {
        image: service.image_ref(),
        ports: port_map(service.ports.iter().map(|p| p.value())),
        volumes,
        devices,
        labels: label_map(service.labels.iter().map(|l| l.value()), service.id()),
        healthcheck: service.healthcheck.as_ref().map(|h| healthcheck_spec(h)),
        restart_policy: RestartPolicy::UnlessStopped,
        detach: true,
    })
}
