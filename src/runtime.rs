//! Container runtime boundary.
//!
//! Everything the lifecycle code needs from a container engine goes through
//! [`ContainerRuntime`]. [`crate::docker::DockerClient`] is the production
//! implementation; tests plug in an in-memory runtime.

use crate::docker::DockerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stream of log lines from a container. Ends when the container stops
/// producing output or the consumer drops it.
pub type LogStream = BoxStream<'static, Result<String, DockerError>>;

/// Stream of container lifecycle events.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, DockerError>>;

/// Add the implicit `:latest` tag to an image reference that has none.
///
/// `nginx` → `nginx:latest`, `registry:5000/app` → `registry:5000/app:latest`.
/// Digest references are returned untouched.
pub fn normalize_image_ref(image: &str) -> String {
    let image = image.trim();
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Split a `name:tag` reference into its parts, defaulting the tag to
/// `latest`. A registry port (`host:5000/app`) is not mistaken for a tag.
pub fn split_image_ref(image: &str) -> (String, String) {
    let image = image.trim();
    let slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[slash..].rfind(':') {
        Some(colon) => (
            image[..slash + colon].to_string(),
            image[slash + colon + 1..].to_string(),
        ),
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Runtime-reported container state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
            ContainerState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// A concrete container as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: Option<String>,
    /// Normalized `name:tag` references of the container's image.
    pub image_tags: Vec<String>,
    pub state: ContainerState,
}

impl ContainerHandle {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Exact tag equality against a `name:tag` reference.
    pub fn has_image(&self, image_ref: &str) -> bool {
        let wanted = normalize_image_ref(image_ref);
        self.image_tags.iter().any(|tag| *tag == wanted)
    }
}

/// Restart policy passed to the runtime when creating a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

/// Healthcheck in the runtime's native units. Durations are nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckSpec {
    /// Test in exec form, e.g. `["CMD-SHELL", "curl -f localhost"]`.
    pub test: Vec<String>,
    pub interval_ns: u64,
    pub timeout_ns: u64,
    pub start_period_ns: u64,
    pub retries: u32,
}

/// Everything needed to create and start a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    /// `"<container_port>/tcp"` → host port.
    pub ports: BTreeMap<String, u16>,
    /// `host:container` bind or named-volume specs.
    pub volumes: Vec<String>,
    /// `host:container:permissions` device specs.
    pub devices: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub healthcheck: Option<HealthcheckSpec>,
    pub restart_policy: RestartPolicy,
    pub detach: bool,
}

/// Container lifecycle events the reconciliation loop cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Start,
    Stop,
    Die,
    Destroy,
}

impl EventAction {
    pub const ALL: [EventAction; 4] = [
        EventAction::Start,
        EventAction::Stop,
        EventAction::Die,
        EventAction::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Die => "die",
            EventAction::Destroy => "destroy",
        }
    }

    /// Whether the event means the container is running afterwards.
    pub fn is_running(&self) -> bool {
        matches!(self, EventAction::Start)
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(EventAction::Start),
            "stop" => Ok(EventAction::Stop),
            "die" => Ok(EventAction::Die),
            "destroy" => Ok(EventAction::Destroy),
            other => Err(format!("unsupported container event '{}'", other)),
        }
    }
}

/// Filter for an event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Resource type, `container` for lifecycle events.
    pub resource_type: String,
    pub actions: Vec<EventAction>,
}

impl EventFilter {
    pub fn container_lifecycle() -> Self {
        Self {
            resource_type: "container".to_string(),
            actions: EventAction::ALL.to_vec(),
        }
    }
}

/// One container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub action: EventAction,
    /// Image reference from the event attributes, normalized.
    pub image: Option<String>,
    pub name: Option<String>,
}

/// Raw resource statistics sample, shaped like the Engine API stats body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsSample {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub blkio_stats: BlkioStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    pub system_cpu_usage: Option<u64>,
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CpuUsage {
    pub total_usage: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemoryStats {
    pub usage: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlkioStats {
    pub io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlkioEntry {
    pub op: String,
    pub value: u64,
}

/// Operations the lifecycle manager performs against a container engine.
///
/// Implementations must be safe for concurrent use; each call is independent.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by id. `Ok(None)` when it does not exist.
    async fn get(&self, id: &str) -> Result<Option<ContainerHandle>, DockerError>;

    /// Every container the runtime knows about, running or not.
    async fn list(&self) -> Result<Vec<ContainerHandle>, DockerError>;

    /// Create and start a container. Returns its id.
    async fn run(&self, spec: &RunSpec) -> Result<String, DockerError>;

    async fn start(&self, id: &str) -> Result<(), DockerError>;

    async fn stop(&self, id: &str) -> Result<(), DockerError>;

    async fn remove(&self, id: &str) -> Result<(), DockerError>;

    async fn restart(&self, id: &str) -> Result<(), DockerError>;

    /// Follow a container's output.
    async fn logs(&self, id: &str) -> Result<LogStream, DockerError>;

    /// Take one statistics sample.
    async fn stats(&self, id: &str) -> Result<StatsSample, DockerError>;

    async fn image_exists(&self, image: &str) -> Result<bool, DockerError>;

    async fn pull(&self, image: &str) -> Result<(), DockerError>;

    /// Subscribe to runtime events matching `filter`.
    async fn events(&self, filter: &EventFilter) -> Result<EventStream, DockerError>;
}
