//! Docker CLI client.
//!
//! All Docker interactions go through `DockerClient`, which provides
//! consistent timeout handling, stderr classification into [`DockerError`],
//! and a single point where the `docker` command is constructed.

use super::engine;
use super::DockerError;
use crate::runtime::{
    normalize_image_ref, ContainerHandle, ContainerRuntime, ContainerState, EventAction,
    EventFilter, EventStream, LogStream, RunSpec, RuntimeEvent, StatsSample,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Lines of stderr kept from a followed command for error classification.
const STDERR_TAIL: usize = 20;

/// Per-call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DockerTimeouts {
    /// Short commands: inspect, ps, start, rm, restart.
    pub command: Duration,
    /// Image pulls.
    pub pull: Duration,
    /// `docker stop`, which waits for the container's grace period.
    pub stop: Duration,
}

impl Default for DockerTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            pull: Duration::from_secs(600),
            stop: Duration::from_secs(60),
        }
    }
}

/// Client for Docker CLI operations.
///
/// Stateless per call and cheap to clone; construct once and share.
#[derive(Debug, Clone)]
pub struct DockerClient {
    binary: String,
    socket: PathBuf,
    timeouts: DockerTimeouts,
}

impl DockerClient {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            socket: default_socket(),
            timeouts: DockerTimeouts::default(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = socket.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: DockerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn command_string(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Run a docker command with a timeout, returning raw Output.
    async fn exec(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.binary)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let cmd_str = self.command_string(args);

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Run a docker command, returning Output only if exit 0. Failures are
    /// classified against `subject`.
    async fn run_success(
        &self,
        args: &[&str],
        subject: &str,
        timeout: Duration,
    ) -> Result<Output, DockerError> {
        let output = self.exec(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(DockerError::classify(self.command_string(args), subject, &output))
        }
    }

    /// Spawn a long-running command and relay its stdout line by line.
    ///
    /// The child is killed when the returned stream is dropped. A non-zero
    /// exit becomes a final error item. With `stderr_as_output`, stderr lines
    /// are relayed too, prefixed with `[stderr] `.
    fn follow(
        &self,
        args: &[&str],
        subject: &str,
        stderr_as_output: bool,
    ) -> Result<LogStream, DockerError> {
        let cmd_str = self.command_string(args);
        let mut child = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DockerError::parse(&cmd_str, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DockerError::parse(&cmd_str, "stderr was not captured"))?;

        let (tx, rx) = mpsc::channel::<Result<String, DockerError>>(256);
        let subject = subject.to_string();

        tokio::spawn(async move {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let mut err_open = true;
            let mut err_tail: Vec<String> = Vec::new();

            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    line = out.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(Ok(line)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(DockerError::exec_failed(&cmd_str, e))).await;
                            return;
                        }
                    },
                    line = err.next_line(), if err_open => match line {
                        Ok(Some(line)) => {
                            if stderr_as_output
                                && tx.send(Ok(format!("[stderr] {}", line))).await.is_err()
                            {
                                return;
                            }
                            push_tail(&mut err_tail, line);
                        }
                        _ => err_open = false,
                    },
                }
            }

            while err_open {
                match err.next_line().await {
                    Ok(Some(line)) => {
                        if stderr_as_output
                            && tx.send(Ok(format!("[stderr] {}", line))).await.is_err()
                        {
                            return;
                        }
                        push_tail(&mut err_tail, line);
                    }
                    _ => err_open = false,
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let stderr = err_tail.join("\n");
                    let _ = tx
                        .send(Err(DockerError::classify_stderr(
                            &cmd_str,
                            &subject,
                            stderr.trim(),
                            status.code(),
                        )))
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(Err(DockerError::exec_failed(&cmd_str, e))).await;
                }
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    // ========================================================================
    // Daemon health
    // ========================================================================

    /// Check if the Docker daemon is healthy.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .exec(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn get(&self, id: &str) -> Result<Option<ContainerHandle>, DockerError> {
        let args = ["container", "inspect", id];
        match self.run_success(&args, id, self.timeouts.command).await {
            Ok(output) => {
                let json = String::from_utf8_lossy(&output.stdout);
                let mut handles =
                    parse_inspect(&json).map_err(|e| DockerError::parse(self.command_string(&args), e))?;
                Ok(if handles.is_empty() {
                    None
                } else {
                    Some(handles.swap_remove(0))
                })
            }
            Err(e) if e.is_container_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<ContainerHandle>, DockerError> {
        let args = ["ps", "-a", "--no-trunc", "--format", "{{json .}}"];
        let output = self.run_success(&args, "", self.timeouts.command).await?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| parse_ps_line(line).map_err(|e| DockerError::parse(self.command_string(&args), e)))
            .collect()
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, DockerError> {
        let args = run_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        // Creating a container may implicitly pull, so it gets the pull budget.
        let output = self
            .run_success(&arg_refs, &spec.image, self.timeouts.pull)
            .await?;
        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string();
        if id.is_empty() {
            return Err(DockerError::parse(
                self.command_string(&arg_refs),
                "no container id on stdout",
            ));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), DockerError> {
        self.run_success(&["start", id], id, self.timeouts.command)
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<(), DockerError> {
        self.run_success(&["stop", id], id, self.timeouts.stop)
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), DockerError> {
        self.run_success(&["rm", id], id, self.timeouts.command)
            .await
            .map(|_| ())
    }

    async fn restart(&self, id: &str) -> Result<(), DockerError> {
        self.run_success(&["restart", id], id, self.timeouts.stop)
            .await
            .map(|_| ())
    }

    async fn logs(&self, id: &str) -> Result<LogStream, DockerError> {
        self.follow(&["logs", "--follow", id], id, true)
    }

    async fn stats(&self, id: &str) -> Result<StatsSample, DockerError> {
        let path = format!("/containers/{}/stats?stream=false", id);
        engine::get_json(&self.socket, &path, id, self.timeouts.command).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool, DockerError> {
        match self
            .run_success(&["image", "inspect", image], image, self.timeouts.command)
            .await
        {
            Ok(_) => Ok(true),
            Err(DockerError::ImageNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn pull(&self, image: &str) -> Result<(), DockerError> {
        self.run_success(&["pull", image], image, self.timeouts.pull)
            .await
            .map(|_| ())
    }

    async fn events(&self, filter: &EventFilter) -> Result<EventStream, DockerError> {
        let args = events_args(filter);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let lines = self.follow(&arg_refs, "", false)?;

        Ok(lines
            .filter_map(|line| {
                futures::future::ready(match line {
                    Ok(line) => match parse_event_line(&line) {
                        Ok(event) => event.map(Ok),
                        Err(reason) => {
                            tracing::debug!("Skipping unreadable docker event: {}", reason);
                            None
                        }
                    },
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed())
    }
}

fn default_socket() -> PathBuf {
    match std::env::var("DOCKER_HOST") {
        Ok(host) if host.starts_with("unix://") => PathBuf::from(&host["unix://".len()..]),
        _ => PathBuf::from(DEFAULT_SOCKET),
    }
}

fn push_tail(tail: &mut Vec<String>, line: String) {
    if tail.len() == STDERR_TAIL {
        tail.remove(0);
    }
    tail.push(line);
}

/// Build `docker run` arguments for a [`RunSpec`].
pub(crate) fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    if spec.detach {
        args.push("-d".to_string());
    }
    args.push("--restart".to_string());
    args.push(spec.restart_policy.as_str().to_string());

    for (container_port, host_port) in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", host_port, container_port));
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    for device in &spec.devices {
        args.push("--device".to_string());
        args.push(device.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    if let Some(hc) = &spec.healthcheck {
        let cmd = match hc.test.split_first() {
            Some((kind, rest)) if kind == "CMD-SHELL" || kind == "CMD" => rest.join(" "),
            _ => hc.test.join(" "),
        };
        if !cmd.is_empty() {
            args.push("--health-cmd".to_string());
            args.push(cmd);
        }
        // Zero means "use the runtime default" and is left off the command line.
        for (flag, ns) in [
            ("--health-interval", hc.interval_ns),
            ("--health-timeout", hc.timeout_ns),
            ("--health-start-period", hc.start_period_ns),
        ] {
            if ns > 0 {
                args.push(flag.to_string());
                args.push(format!("{}ns", ns));
            }
        }
        if hc.retries > 0 {
            args.push("--health-retries".to_string());
            args.push(hc.retries.to_string());
        }
    }

    args.push(spec.image.clone());
    args
}

fn events_args(filter: &EventFilter) -> Vec<String> {
    let mut args = vec![
        "events".to_string(),
        "--format".to_string(),
        "{{json .}}".to_string(),
        "--filter".to_string(),
        format!("type={}", filter.resource_type),
    ];
    for action in &filter.actions {
        args.push("--filter".to_string());
        args.push(format!("event={}", action));
    }
    args
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: Option<String>,
    config: Option<InspectConfig>,
    state: Option<InspectState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: Option<String>,
}

/// Parse `docker container inspect` output (a JSON array).
fn parse_inspect(json: &str) -> Result<Vec<ContainerHandle>, String> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json).map_err(|e| e.to_string())?;
    Ok(entries
        .into_iter()
        .map(|entry| ContainerHandle {
            id: entry.id,
            name: entry
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .filter(|n| !n.is_empty()),
            image_tags: entry
                .config
                .and_then(|c| c.image)
                .map(|image| vec![normalize_image_ref(&image)])
                .unwrap_or_default(),
            state: entry
                .state
                .and_then(|s| s.status)
                .map(|s| ContainerState::parse(&s))
                .unwrap_or_else(|| ContainerState::Unknown(String::new())),
        })
        .collect())
}

#[derive(Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
}

/// Parse one `docker ps --format '{{json .}}'` line.
fn parse_ps_line(line: &str) -> Result<ContainerHandle, String> {
    let ps: PsLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let name = ps.names.split(',').next().unwrap_or_default().trim().to_string();
    Ok(ContainerHandle {
        id: ps.id,
        name: (!name.is_empty()).then_some(name),
        image_tags: if ps.image.is_empty() {
            Vec::new()
        } else {
            vec![normalize_image_ref(&ps.image)]
        },
        state: ContainerState::parse(&ps.state),
    })
}

#[derive(Deserialize)]
struct EventLine {
    #[serde(rename = "Action")]
    action: Option<String>,
    status: Option<String>,
    id: Option<String>,
    from: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<EventActor>,
}

#[derive(Deserialize)]
struct EventActor {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "Attributes", default)]
    attributes: BTreeMap<String, String>,
}

/// Parse one `docker events --format '{{json .}}'` line.
///
/// Returns `Ok(None)` for actions outside the lifecycle set.
fn parse_event_line(line: &str) -> Result<Option<RuntimeEvent>, String> {
    let event: EventLine = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let Some(action) = event.action.or(event.status) else {
        return Err("event has no action".to_string());
    };
    let Ok(action) = action.parse::<EventAction>() else {
        return Ok(None);
    };

    let (actor_id, mut attributes) = match event.actor {
        Some(actor) => (actor.id, actor.attributes),
        None => (None, BTreeMap::new()),
    };
    let Some(container_id) = actor_id.or(event.id).filter(|id| !id.is_empty()) else {
        return Err("event has no container id".to_string());
    };

    let image = attributes
        .remove("image")
        .or(event.from)
        .filter(|i| !i.is_empty())
        .map(|i| normalize_image_ref(&i));

    Ok(Some(RuntimeEvent {
        container_id,
        action,
        image,
        name: attributes.remove("name"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HealthcheckSpec, RestartPolicy};

    #[test]
    fn parses_inspect_output() {
        let json = r#"[{
            "Id": "4f66ad9a0b2e",
            "Name": "/octoprint",
            "Config": {"Image": "octoprint/octoprint"},
            "State": {"Status": "exited", "Running": false}
        }]"#;
        let handles = parse_inspect(json).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, "4f66ad9a0b2e");
        assert_eq!(handles[0].name.as_deref(), Some("octoprint"));
        assert_eq!(handles[0].image_tags, vec!["octoprint/octoprint:latest"]);
        assert_eq!(handles[0].state, ContainerState::Exited);
    }

    #[test]
    fn parses_ps_line() {
        let line = r#"{"Command":"\"nginx -g\"","ID":"abc123","Image":"nginx:1.25","Names":"web,alias","State":"running","Status":"Up 2 hours"}"#;
        let handle = parse_ps_line(line).unwrap();
        assert_eq!(handle.id, "abc123");
        assert_eq!(handle.name.as_deref(), Some("web"));
        assert!(handle.has_image("nginx:1.25"));
        assert!(handle.is_running());
    }

    #[test]
    fn parses_lifecycle_event() {
        let line = r#"{"status":"die","id":"abc","from":"foo","Type":"container","Action":"die","Actor":{"ID":"abc","Attributes":{"exitCode":"0","image":"foo","name":"foo-1"}},"scope":"local","time":1700000000}"#;
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.container_id, "abc");
        assert_eq!(event.action, EventAction::Die);
        assert_eq!(event.image.as_deref(), Some("foo:latest"));
        assert_eq!(event.name.as_deref(), Some("foo-1"));
    }

    #[test]
    fn parses_event_without_legacy_fields() {
        let line = r#"{"Type":"container","Action":"start","Actor":{"ID":"def","Attributes":{"image":"bar:2"}}}"#;
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.container_id, "def");
        assert_eq!(event.action, EventAction::Start);
        assert_eq!(event.image.as_deref(), Some("bar:2"));
    }

    #[test]
    fn ignores_other_actions() {
        let line = r#"{"Type":"container","Action":"exec_start: sh","Actor":{"ID":"def","Attributes":{}}}"#;
        assert_eq!(parse_event_line(line).unwrap(), None);
        assert!(parse_event_line("not json").is_err());
    }

    #[test]
    fn run_args_cover_every_mapping() {
        let mut ports = BTreeMap::new();
        ports.insert("5000/tcp".to_string(), 5557);
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "edge".to_string());
        let spec = RunSpec {
            image: "octoprint/octoprint:latest".into(),
            ports,
            volumes: vec!["/srv/octo:/octoprint".into()],
            devices: vec!["/dev/ttyACM0:/dev/ttyACM0:rwm".into()],
            labels,
            healthcheck: Some(HealthcheckSpec {
                test: vec!["CMD-SHELL".into(), "curl -f http://localhost".into()],
                interval_ns: 30_000_000_000,
                timeout_ns: 10_000_000_000,
                start_period_ns: 0,
                retries: 3,
            }),
            restart_policy: RestartPolicy::UnlessStopped,
            detach: true,
        };

        let args = run_args(&spec);
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --restart unless-stopped"));
        assert!(joined.contains("-p 5557:5000/tcp"));
        assert!(joined.contains("-v /srv/octo:/octoprint"));
        assert!(joined.contains("--device /dev/ttyACM0:/dev/ttyACM0:rwm"));
        assert!(joined.contains("--label tier=edge"));
        assert!(joined.contains("--health-interval 30000000000ns"));
        assert!(joined.contains("--health-retries 3"));
        assert!(!joined.contains("--health-start-period"));
        assert!(args.contains(&"curl -f http://localhost".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("octoprint/octoprint:latest"));
    }

    #[test]
    fn events_args_filter_type_and_actions() {
        let args = events_args(&EventFilter::container_lifecycle());
        let joined = args.join(" ");
        assert!(joined.contains("--filter type=container"));
        for action in EventAction::ALL {
            assert!(joined.contains(&format!("--filter event={}", action)));
        }
    }

    #[test]
    fn builder_overrides_defaults() {
        let client = DockerClient::new()
            .with_binary("podman")
            .with_socket("/run/podman.sock");
        assert_eq!(client.binary, "podman");
        assert_eq!(client.socket(), Path::new("/run/podman.sock"));
    }
}
