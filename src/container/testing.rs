//! In-memory container runtime for unit tests.

use crate::container::{
    Container, ContainerRuntime, ContainerSpec, HostBinding, LogRelay, LogStream, NamedPorts,
    Port, RegistryCredential, ResolvedPorts, RuntimeError,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FIRST_HOST_PORT: u16 = 49153;

#[derive(Debug)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    bindings: Vec<HostBinding>,
    output_done: CancellationToken,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<String>,
    authenticated_pulls: Vec<bool>,
    local_images: HashSet<String>,
    containers: HashMap<String, MockContainer>,
    created: Vec<(String, ContainerSpec)>,
    next_id: u64,
    next_host_port: u16,
}

/// Records every call and keeps containers in memory.
#[derive(Debug)]
pub(crate) struct MockRuntime {
    state: Mutex<MockState>,
    host: String,
    pull_error: Option<String>,
    create_error: Option<String>,
    start_error: Option<String>,
    stop_error: Option<String>,
    remove_error: Option<String>,
    unbound_ports: Vec<Port>,
    fixed_host_ports: HashMap<Port, u16>,
    log_lines: Vec<String>,
}

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_host_port: FIRST_HOST_PORT,
                ..Default::default()
            }),
            host: "127.0.0.1".to_string(),
            pull_error: None,
            create_error: None,
            start_error: None,
            stop_error: None,
            remove_error: None,
            unbound_ports: Vec::new(),
            fixed_host_ports: HashMap::new(),
            log_lines: Vec::new(),
        }
    }

    pub(crate) fn with_local_image(self, image: &str) -> Self {
        self.state.lock().unwrap().local_images.insert(image.to_string());
        self
    }

    pub(crate) fn with_pull_error(mut self, message: &str) -> Self {
        self.pull_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_create_error(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_start_error(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_remove_error(mut self, message: &str) -> Self {
        self.remove_error = Some(message.to_string());
        self
    }

    /// The port is published but never gets a host binding.
    pub(crate) fn with_unbound_port(mut self, port: Port) -> Self {
        self.unbound_ports.push(port);
        self
    }

    /// Bind `port` to a known host port instead of the next free one.
    pub(crate) fn with_host_port(mut self, port: Port, host_port: u16) -> Self {
        self.fixed_host_ports.insert(port, host_port);
        self
    }

    pub(crate) fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Output every container writes before it is stopped.
    pub(crate) fn with_log_lines(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub(crate) fn authenticated_pulls(&self) -> Vec<bool> {
        self.state.lock().unwrap().authenticated_pulls.clone()
    }

    pub(crate) fn is_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .is_some_and(|c| c.running)
    }

    /// Containers that were created and not removed yet.
    pub(crate) fn live_containers(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Name and spec of every create request, in order.
    pub(crate) fn created(&self) -> Vec<(String, ContainerSpec)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Create and start a container exposing `ports`.
    pub(crate) async fn started_container(&self, ports: &NamedPorts) -> String {
        let spec = crate::container::ContainerConfig::from_options("alpine", ports.clone(), vec![])
            .unwrap()
            .spec;
        let id = self.create_container("fixture", &spec).await.unwrap();
        self.start_container(&id).await.unwrap();
        id
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record("image_exists");
        Ok(self.state.lock().unwrap().local_images.contains(image))
    }

    async fn pull_image(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), RuntimeError> {
        self.record("pull");
        let mut state = self.state.lock().unwrap();
        state.authenticated_pulls.push(credential.is_some());

        if let Some(message) = &self.pull_error {
            return Err(RuntimeError::Other(message.clone()));
        }
        state.local_images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, RuntimeError> {
        self.record(format!("create {}", name));
        let mut state = self.state.lock().unwrap();
        state.created.push((name.to_string(), spec.clone()));

        if let Some(message) = &self.create_error {
            return Err(RuntimeError::Other(message.clone()));
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                running: false,
                bindings: Vec::new(),
                output_done: CancellationToken::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record("start");
        if let Some(message) = &self.start_error {
            return Err(RuntimeError::Other(message.clone()));
        }

        let mut state = self.state.lock().unwrap();
        let mut next_host_port = state.next_host_port;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;

        container.bindings = container
            .spec
            .ports
            .distinct_ports()
            .into_iter()
            .filter(|port| !self.unbound_ports.contains(port))
            .map(|port| {
                let host_port = self.fixed_host_ports.get(&port).copied().unwrap_or_else(|| {
                    next_host_port += 1;
                    next_host_port - 1
                });
                HostBinding { port, host_port }
            })
            .collect();
        container.running = true;
        state.next_host_port = next_host_port;
        Ok(())
    }

    async fn inspect_ports(&self, id: &str) -> Result<Vec<HostBinding>, RuntimeError> {
        self.record("inspect");
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.bindings.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    fn logs(&self, id: &str) -> LogStream {
        self.record("logs");
        let Some(done) = self
            .state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.output_done.clone())
        else {
            return Box::pin(stream::iter(vec![Err::<Vec<u8>, RuntimeError>(
                RuntimeError::NotFound(id.to_string()),
            )]));
        };

        let lines: Vec<Result<Vec<u8>, RuntimeError>> = self
            .log_lines
            .iter()
            .map(|line| Ok(line.as_bytes().to_vec()))
            .collect();

        let until_stopped = stream::once(async move { done.cancelled().await })
            .filter_map(|()| async { None::<Result<Vec<u8>, RuntimeError>> });

        Box::pin(stream::iter(lines).chain(until_stopped))
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record("stop");
        if let Some(message) = &self.stop_error {
            return Err(RuntimeError::Other(message.clone()));
        }

        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        container.output_done.cancel();
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record("remove");
        if let Some(message) = &self.remove_error {
            return Err(RuntimeError::Other(message.clone()));
        }

        let container = self
            .state
            .lock()
            .unwrap()
            .containers
            .remove(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.output_done.cancel();
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// A ready container handle with one TCP port bound to `host_port`.
pub(crate) fn test_container_with_port(host_port: u16) -> Container {
    let requested = NamedPorts::default_tcp(80);
    let bound = [HostBinding {
        port: Port::tcp(80),
        host_port,
    }];
    let ports = ResolvedPorts::assemble(&requested, &bound, "127.0.0.1").unwrap();

    Container::new(
        "0123456789abcdef0123".to_string(),
        "stevedore-test".to_string(),
        "alpine:latest".to_string(),
        "127.0.0.1".to_string(),
        ports,
        LogRelay::disabled(),
    )
}

pub(crate) fn test_container() -> Container {
    test_container_with_port(FIRST_HOST_PORT)
}
