use super::Settings;
use crate::error::{Error, Result};
use crate::service::translate::{device_permissions, device_spec, volume_spec};
use std::collections::HashSet;

impl Settings {
    /// Check the settings before anything is seeded or started.
    ///
    /// Catches what would otherwise only fail at container creation: bad
    /// durations, duplicate service names, unusable ports, relative container
    /// paths and unknown device permissions.
    pub fn validate(&self) -> Result<()> {
        self.docker_timeouts()?;
        self.stats_interval()?;

        if self.docker.binary.trim().is_empty() {
            return Err(Error::Config("docker.binary must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            let name = service.name.trim();
            if name.is_empty() {
                return Err(Error::Config("Every service needs a name".to_string()));
            }
            if !names.insert(name) {
                return Err(Error::Config(format!("Duplicate service name '{}'", name)));
            }
            if service.image_name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Service '{}' has no image_name",
                    name
                )));
            }

            let mut host_ports = HashSet::new();
            for port in &service.ports {
                if port.container_port == 0 || port.host_port == 0 {
                    return Err(Error::Config(format!(
                        "Service '{}' maps port {} -> {}; ports must be non-zero",
                        name, port.container_port, port.host_port
                    )));
                }
                if !host_ports.insert(port.host_port) {
                    return Err(Error::Config(format!(
                        "Service '{}' publishes host port {} more than once",
                        name, port.host_port
                    )));
                }
            }

            for volume in &service.volumes {
                volume_spec(volume)
                    .map_err(|e| Error::Config(format!("Service '{}': {}", name, e)))?;
            }
            for device in &service.devices {
                device_permissions(&device.permissions)
                    .and_then(|_| device_spec(device))
                    .map_err(|e| Error::Config(format!("Service '{}': {}", name, e)))?;
            }
            if let Some(healthcheck) = &service.healthcheck {
                if healthcheck.test.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "Service '{}' has an empty healthcheck test",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}
