use super::duration::parse_setting;
use crate::docker::{DockerClient, DockerTimeouts};
use crate::error::Result;
use crate::model::ServiceSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `mission-control.yaml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub docker: DockerSettings,
    pub streaming: StreamingSettings,
    /// Seed catalogue loaded by `mctl seed`.
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Relative paths are resolved against the settings file's directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerSettings {
    pub binary: String,
    /// Daemon socket for raw statistics; `DOCKER_HOST` or the default socket
    /// when unset.
    pub socket: Option<PathBuf>,
    pub command_timeout: String,
    pub pull_timeout: String,
    pub stop_timeout: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            socket: None,
            command_timeout: "30s".to_string(),
            pull_timeout: "10m".to_string(),
            stop_timeout: "60s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamingSettings {
    /// Pause between two statistics samples.
    pub stats_interval: String,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            stats_interval: "1s".to_string(),
        }
    }
}

impl Settings {
    pub fn docker_timeouts(&self) -> Result<DockerTimeouts> {
        Ok(DockerTimeouts {
            command: parse_setting("docker.command_timeout", &self.docker.command_timeout)?,
            pull: parse_setting("docker.pull_timeout", &self.docker.pull_timeout)?,
            stop: parse_setting("docker.stop_timeout", &self.docker.stop_timeout)?,
        })
    }

    pub fn docker_client(&self) -> Result<DockerClient> {
        let mut client = DockerClient::new()
            .with_binary(self.docker.binary.clone())
            .with_timeouts(self.docker_timeouts()?);
        if let Some(socket) = &self.docker.socket {
            client = client.with_socket(socket.clone());
        }
        Ok(client)
    }

    pub fn stats_interval(&self) -> Result<Duration> {
        parse_setting("streaming.stats_interval", &self.streaming.stats_interval)
    }

    /// Database location. An explicit `override_path` wins; then the
    /// configured path (relative to `base_dir`); then the per-user data
    /// directory.
    pub fn database_path(&self, base_dir: Option<&Path>, override_path: Option<&Path>) -> PathBuf {
        if let Some(path) = override_path {
            return path.to_path_buf();
        }
        if let Some(path) = &self.database.path {
            return match base_dir {
                Some(base) if path.is_relative() => base.join(path),
                _ => path.clone(),
            };
        }
        default_database_path()
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("mission-control"))
        .unwrap_or_else(|| PathBuf::from(".mission-control"))
        .join("mission-control.db")
}
