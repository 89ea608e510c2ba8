// Shared fixtures for integration tests: an in-memory container runtime and
// a notifier that records what it was asked to publish.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use mission_control::docker::DockerError;
use mission_control::model::ServiceSpec;
use mission_control::notify::Notifier;
use mission_control::runtime::{
    normalize_image_ref, ContainerHandle, ContainerRuntime, ContainerState, EventFilter,
    EventStream, LogStream, RunSpec, RuntimeEvent, StatsSample,
};
use mission_control::state::SqliteServiceStore;
use mission_control::{MissionControl, Service};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub running: bool,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    images: HashSet<String>,
    registry: HashSet<String>,
    next_id: u64,
    calls: Vec<String>,
    runs: Vec<RunSpec>,
    failures: HashMap<String, VecDeque<DockerError>>,
    logs: HashMap<String, Vec<String>>,
    stats: HashMap<String, VecDeque<Result<StatsSample, DockerError>>>,
    subscribers: Vec<mpsc::UnboundedSender<Result<RuntimeEvent, DockerError>>>,
    subscriptions: usize,
}

/// In-memory stand-in for Docker.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` available locally.
    pub fn add_image(&self, image: &str) {
        self.state.lock().images.insert(normalize_image_ref(image));
    }

    /// Make `image` pullable.
    pub fn publish_image(&self, image: &str) {
        self.state.lock().registry.insert(normalize_image_ref(image));
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().images.contains(&normalize_image_ref(image))
    }

    /// Create a container behind mission-control's back.
    pub fn add_container(&self, image: &str, running: bool) -> String {
        let mut state = self.state.lock();
        let id = next_container_id(&mut state);
        state.containers.push(FakeContainer {
            id: id.clone(),
            image: normalize_image_ref(image),
            running,
        });
        id
    }

    /// Remove a container out of band, as `docker rm -f` would.
    pub fn remove_container(&self, id: &str) {
        self.state.lock().containers.retain(|c| c.id != id);
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.state.lock().containers.iter_mut().find(|c| c.id == id) {
            c.running = running;
        }
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.clone()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().containers.iter().find(|c| c.id == id).cloned()
    }

    pub fn running_containers(&self) -> usize {
        self.state.lock().containers.iter().filter(|c| c.running).count()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.state.lock().runs.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == op).count()
    }

    /// Make the next call to `op` fail with `err`. Queues up.
    pub fn fail_next(&self, op: &str, err: DockerError) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn set_logs(&self, id: &str, lines: &[&str]) {
        self.state
            .lock()
            .logs
            .insert(id.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn push_stats(&self, id: &str, sample: Result<StatsSample, DockerError>) {
        self.state
            .lock()
            .stats
            .entry(id.to_string())
            .or_default()
            .push_back(sample);
    }

    /// Deliver an event to every live subscription.
    pub fn emit_event(&self, event: RuntimeEvent) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// End every live subscription, as a daemon restart would.
    pub fn drop_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().subscriptions
    }

    fn enter(&self, op: &str) -> Result<(), DockerError> {
        let mut state = self.state.lock();
        state.calls.push(op.to_string());
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn next_container_id(state: &mut FakeState) -> String {
    state.next_id += 1;
    format!("{:0>64x}", state.next_id)
}

fn handle(c: &FakeContainer) -> ContainerHandle {
    ContainerHandle {
        id: c.id.clone(),
        name: Some(format!("fake-{}", &c.id[c.id.len() - 4..])),
        image_tags: vec![c.image.clone()],
        state: if c.running {
            ContainerState::Running
        } else {
            ContainerState::Exited
        },
    }
}

fn not_found(id: &str) -> DockerError {
    DockerError::ContainerNotFound {
        container: id.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn get(&self, id: &str) -> Result<Option<ContainerHandle>, DockerError> {
        self.enter("get")?;
        let state = self.state.lock();
        Ok(state.containers.iter().find(|c| c.id == id).map(handle))
    }

    async fn list(&self) -> Result<Vec<ContainerHandle>, DockerError> {
        self.enter("list")?;
        Ok(self.state.lock().containers.iter().map(handle).collect())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, DockerError> {
        self.enter("run")?;
        let mut state = self.state.lock();
        let image = normalize_image_ref(&spec.image);
        if !state.images.contains(&image) {
            return Err(DockerError::ImageNotFound { image });
        }
        let id = next_container_id(&mut state);
        state.containers.push(FakeContainer {
            id: id.clone(),
            image,
            running: true,
        });
        state.runs.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), DockerError> {
        self.enter("start")?;
        let mut state = self.state.lock();
        let c = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        c.running = true;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), DockerError> {
        self.enter("stop")?;
        let mut state = self.state.lock();
        let c = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        c.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), DockerError> {
        self.enter("remove")?;
        let mut state = self.state.lock();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), DockerError> {
        self.enter("restart")?;
        let mut state = self.state.lock();
        let c = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        c.running = true;
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<LogStream, DockerError> {
        self.enter("logs")?;
        let state = self.state.lock();
        if !state.containers.iter().any(|c| c.id == id) {
            return Err(not_found(id));
        }
        let lines = state.logs.get(id).cloned().unwrap_or_default();
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn stats(&self, id: &str) -> Result<StatsSample, DockerError> {
        self.enter("stats")?;
        let mut state = self.state.lock();
        if !state.containers.iter().any(|c| c.id == id) {
            return Err(not_found(id));
        }
        match state.stats.get_mut(id).and_then(VecDeque::pop_front) {
            Some(sample) => sample,
            None => Ok(StatsSample::default()),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, DockerError> {
        self.enter("image_exists")?;
        Ok(self.state.lock().images.contains(&normalize_image_ref(image)))
    }

    async fn pull(&self, image: &str) -> Result<(), DockerError> {
        self.enter("pull")?;
        let mut state = self.state.lock();
        let image = normalize_image_ref(image);
        if !state.registry.contains(&image) {
            return Err(DockerError::ImageNotFound { image });
        }
        state.images.insert(image);
        Ok(())
    }

    async fn events(&self, _filter: &EventFilter) -> Result<EventStream, DockerError> {
        self.enter("events")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.subscribers.push(tx);
        state.subscriptions += 1;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Notifier that keeps every emitted event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, event: &str, payload: Value) {
        self.events.lock().push((event.to_string(), payload));
    }
}

/// An app over an in-memory store, a fake runtime and a recording notifier.
pub struct Harness {
    pub app: Arc<MissionControl>,
    pub runtime: Arc<FakeRuntime>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        let runtime = Arc::new(FakeRuntime::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let store = SqliteServiceStore::new_ephemeral()
            .await
            .expect("ephemeral store");
        let app = MissionControl::new(runtime.clone(), store, notifier.clone())
            .await
            .expect("app")
            .with_stats_interval(std::time::Duration::from_millis(5));
        Self {
            app: Arc::new(app),
            runtime,
            notifier,
        }
    }

    pub async fn seed(&self, spec: ServiceSpec) -> Service {
        self.app.store().insert(spec).await.expect("insert service")
    }

    /// Reload a service from the store.
    pub async fn reload(&self, service: &Service) -> Service {
        self.app
            .store()
            .get(service.id())
            .await
            .expect("get service")
            .expect("service exists")
    }
}

pub fn event(container_id: &str, action: mission_control::runtime::EventAction, image: Option<&str>) -> RuntimeEvent {
    RuntimeEvent {
        container_id: container_id.to_string(),
        action,
        image: image.map(normalize_image_ref),
        name: None,
    }
}

/// A daemon service spec.
pub fn daemon(name: &str, image: &str) -> ServiceSpec {
    ServiceSpec {
        is_daemon: true,
        ..ServiceSpec::new(name, image)
    }
}
