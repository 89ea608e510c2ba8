//! Service catalogue data model.
//!
//! Every persisted entity embeds a [`Record`] by composition. A [`Service`]
//! pairs its declared [`ServiceDefinition`] with a [`RuntimeState`] that can
//! only be replaced as a whole, so "running" and "container reference" never
//! drift apart.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Identity and modification time shared by every persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub last_modified: DateTime<Utc>,
}

impl Record {
    pub fn new(id: i64, last_modified: DateTime<Utc>) -> Self {
        Self { id, last_modified }
    }
}

/// A value together with its persistence [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persisted<T> {
    pub record: Record,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Persisted<T> {
    pub fn new(record: Record, value: T) -> Self {
        Self { record, value }
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Persisted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Kind of catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    /// A Docker container managed by mission-control.
    #[default]
    GenericContainer,
    /// Documentation-only entry, nothing to run.
    Informational,
    Marketing,
    WebProxy,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::GenericContainer => "generic-container",
            ServiceType::Informational => "informational",
            ServiceType::Marketing => "marketing",
            ServiceType::WebProxy => "web-proxy",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic-container" => Ok(ServiceType::GenericContainer),
            "informational" => Ok(ServiceType::Informational),
            "marketing" => Ok(ServiceType::Marketing),
            "web-proxy" => Ok(ServiceType::WebProxy),
            other => Err(format!("unknown service type '{}'", other)),
        }
    }
}

/// Last known runtime state of a service.
///
/// A container reference exists only while the service is believed running.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RuntimeState {
    Running {
        container_id: String,
    },
    #[default]
    Stopped,
}

impl RuntimeState {
    pub fn running(container_id: impl Into<String>) -> Self {
        RuntimeState::Running {
            container_id: container_id.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeState::Running { .. })
    }

    pub fn container_reference(&self) -> Option<&str> {
        match self {
            RuntimeState::Running { container_id } => Some(container_id),
            RuntimeState::Stopped => None,
        }
    }

    /// Rebuild from the two persisted columns. A row marked running without a
    /// reference cannot be confirmed and reads as stopped.
    pub fn from_columns(is_running: bool, container_reference: Option<String>) -> Self {
        match (is_running, container_reference) {
            (true, Some(id)) if !id.is_empty() => RuntimeState::Running { container_id: id },
            _ => RuntimeState::Stopped,
        }
    }
}

/// Container port published on a host port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// Host path or named volume mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,
}

/// Host device passed through to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub host_path: String,
    pub container_path: String,
    /// cgroup permissions, a combination of `r`, `w` and `m`.
    #[serde(default = "default_device_permissions")]
    pub permissions: String,
}

fn default_device_permissions() -> String {
    "r".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// Container healthcheck. Timings are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Shell command run inside the container.
    pub test: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_interval")]
    pub timeout: u64,
    #[serde(default)]
    pub start_period: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Declarative description of a service, as written in the seed catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub is_daemon: bool,
    #[serde(default)]
    pub is_disabled: bool,
    pub image_name: String,
    #[serde(default = "default_tag")]
    pub image_tag: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    #[serde(default)]
    pub devices: Vec<DeviceMapping>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub healthcheck: Option<Healthcheck>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl ServiceSpec {
    /// Minimal spec for a container image; everything else defaulted.
    pub fn new(name: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            logo: None,
            documentation_url: None,
            service_type: ServiceType::default(),
            is_daemon: false,
            is_disabled: false,
            image_name: image_name.into(),
            image_tag: default_tag(),
            ports: Vec::new(),
            volumes: Vec::new(),
            devices: Vec::new(),
            labels: Vec::new(),
            healthcheck: None,
            env: Vec::new(),
        }
    }
}

/// Declared attributes of a persisted service, sub-records included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: Option<String>,
    pub logo: Option<String>,
    pub documentation_url: Option<String>,
    pub service_type: ServiceType,
    pub is_daemon: bool,
    pub is_disabled: bool,
    pub image_name: String,
    pub image_tag: String,
    pub ports: Vec<Persisted<PortMapping>>,
    pub volumes: Vec<Persisted<VolumeMapping>>,
    pub devices: Vec<Persisted<DeviceMapping>>,
    pub labels: Vec<Persisted<Label>>,
    pub healthcheck: Option<Persisted<Healthcheck>>,
    pub env: Vec<Persisted<EnvVar>>,
}

impl ServiceDefinition {
    /// `image_name:image_tag`, the reference images are cached and matched by.
    pub fn image_ref(&self) -> String {
        let tag = if self.image_tag.trim().is_empty() {
            "latest"
        } else {
            self.image_tag.trim()
        };
        format!("{}:{}", self.image_name.trim(), tag)
    }

    /// Access URL synthesized from `*_DOMAIN` / `*_PORT` environment variables.
    ///
    /// The last matching variable of each kind wins. A port without a domain
    /// gives no URL.
    pub fn access_url(&self) -> Option<String> {
        let mut domain = None;
        let mut port = None;
        for var in &self.env {
            if var.key.ends_with("_DOMAIN") {
                domain = Some(var.value.value.as_str());
            } else if var.key.ends_with("_PORT") {
                port = Some(var.value.value.as_str());
            }
        }
        match (domain, port) {
            (Some(domain), Some(port)) => Some(format!("http://{}:{}", domain, port)),
            (Some(domain), None) => Some(format!("http://{}", domain)),
            _ => None,
        }
    }
}

/// A catalogue entry with its last known runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub record: Record,
    #[serde(flatten)]
    pub definition: ServiceDefinition,
    runtime: RuntimeState,
}

impl Service {
    pub fn new(record: Record, definition: ServiceDefinition, runtime: RuntimeState) -> Self {
        Self {
            record,
            definition,
            runtime,
        }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn runtime_state(&self) -> &RuntimeState {
        &self.runtime
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    pub fn container_reference(&self) -> Option<&str> {
        self.runtime.container_reference()
    }

    /// Replace the runtime state in memory. Persisting it is the store's job;
    /// see `SqliteServiceStore::update_runtime_state`.
    pub(crate) fn apply_runtime_state(&mut self, state: RuntimeState, at: DateTime<Utc>) {
        self.runtime = state;
        self.record.last_modified = at;
    }
}

impl Deref for Service {
    type Target = ServiceDefinition;

    fn deref(&self) -> &ServiceDefinition {
        &self.definition
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> Record {
        Record::new(id, Utc::now())
    }

    fn definition(env: &[(&str, &str)]) -> ServiceDefinition {
        ServiceDefinition {
            name: "octoprint".into(),
            description: None,
            logo: None,
            documentation_url: None,
            service_type: ServiceType::GenericContainer,
            is_daemon: false,
            is_disabled: false,
            image_name: "octoprint/octoprint".into(),
            image_tag: "".into(),
            ports: vec![],
            volumes: vec![],
            devices: vec![],
            labels: vec![],
            healthcheck: None,
            env: env
                .iter()
                .enumerate()
                .map(|(i, (k, v))| {
                    Persisted::new(
                        record(i as i64 + 1),
                        EnvVar {
                            key: k.to_string(),
                            value: v.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn runtime_state_pairs_flag_and_reference() {
        let running = RuntimeState::running("abc");
        assert!(running.is_running());
        assert_eq!(running.container_reference(), Some("abc"));
        assert_eq!(RuntimeState::Stopped.container_reference(), None);

        assert_eq!(
            RuntimeState::from_columns(true, Some("abc".into())),
            running
        );
        assert_eq!(RuntimeState::from_columns(true, None), RuntimeState::Stopped);
        assert_eq!(
            RuntimeState::from_columns(false, Some("abc".into())),
            RuntimeState::Stopped
        );
    }

    #[test]
    fn access_url_from_env() {
        assert_eq!(
            definition(&[("OCTO_DOMAIN", "octo.local"), ("OCTO_PORT", "5000")]).access_url(),
            Some("http://octo.local:5000".to_string())
        );
        assert_eq!(
            definition(&[("OCTO_DOMAIN", "octo.local")]).access_url(),
            Some("http://octo.local".to_string())
        );
        assert_eq!(definition(&[("OCTO_PORT", "5000")]).access_url(), None);
        assert_eq!(
            definition(&[("A_DOMAIN", "a"), ("B_DOMAIN", "b"), ("X_PORT", "1")]).access_url(),
            Some("http://b:1".to_string())
        );
    }

    #[test]
    fn image_ref_defaults_tag() {
        let def = definition(&[]);
        assert_eq!(def.image_ref(), "octoprint/octoprint:latest");
    }

    #[test]
    fn apply_runtime_state_bumps_last_modified() {
        let mut service = Service::new(record(7), definition(&[]), RuntimeState::Stopped);
        let later = service.record.last_modified + chrono::Duration::seconds(5);
        service.apply_runtime_state(RuntimeState::running("c1"), later);
        assert!(service.is_running());
        assert_eq!(service.container_reference(), Some("c1"));
        assert_eq!(service.record.last_modified, later);
    }

    #[test]
    fn spec_defaults_from_yaml() {
        let spec: ServiceSpec = serde_yaml::from_str(
            r#"
name: OctoPrint
image_name: octoprint/octoprint
devices:
  - host_path: /dev/ttyACM0
    container_path: /dev/ttyACM0
healthcheck:
  test: curl -f http://localhost:5000
"#,
        )
        .unwrap();
        assert_eq!(spec.image_tag, "latest");
        assert_eq!(spec.service_type, ServiceType::GenericContainer);
        assert_eq!(spec.devices[0].permissions, "r");
        let hc = spec.healthcheck.unwrap();
        assert_eq!((hc.interval, hc.timeout, hc.start_period, hc.retries), (30, 30, 0, 3));
    }
}
