//! Docker/Podman client wrapper.
//!
//! Implements [`ContainerRuntime`] over the bollard Docker API, with
//! automatic connection handling and a Podman fallback.

use crate::container::{
    ContainerRuntime, ContainerSpec, HostBinding, LogStream, Port, RegistryCredential,
    RuntimeError,
};
use crate::env;
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::errors::Error as BollardError;
use bollard::service::{HostConfig, PortBinding};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Connection timeout in seconds
    pub timeout: u64,
    /// Number of pings before a candidate daemon is given up on
    pub retries: u32,
    /// Pause between pings
    pub retry_delay: Duration,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            timeout: 120,
            retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Docker/Podman API client wrapper.
///
/// Manages connection to Docker or Podman daemon with automatic fallback
/// and health checking.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
    host: String,
}

impl ContainerClient {
    /// Create a new container client with default configuration.
    ///
    /// Attempts to connect to Docker first, then falls back to Podman if available.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are available or connection fails.
    pub async fn new() -> Result<Self, RuntimeError> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Create a new container client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self, RuntimeError> {
        let docker = Self::connect(&config).await?;
        let host = resolve_host(std::env::var(env::runtime::DOCKER_HOST_VAR).ok().as_deref());
        debug!(host = %host, "Published ports resolve to host");

        Ok(Self {
            docker: Arc::new(docker),
            host,
        })
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Candidates are tried in order and the first one answering a ping wins:
    /// 1. Local defaults (`DOCKER_HOST`, Unix socket or Windows named pipe)
    /// 2. Rootless Podman socket
    /// 3. System Podman socket
    async fn connect(config: &ContainerClientConfig) -> Result<Docker, RuntimeError> {
        debug!("Attempting to connect to container runtime...");
        let mut candidates: Vec<(String, Docker)> = Vec::new();

        match Docker::connect_with_local_defaults() {
            Ok(docker) => candidates.push(("local defaults".to_string(), docker)),
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                sockets.push(format!("unix://{}/podman/podman.sock", runtime_dir));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                match Docker::connect_with_socket(&socket, config.timeout, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => candidates.push((socket, docker)),
                    Err(e) => debug!("Podman socket {} failed: {}", socket, e),
                }
            }
        }

        for (label, docker) in candidates {
            match ping_with_retries(&docker, config).await {
                Ok(()) => {
                    info!("Connected to container runtime via {}", label);
                    return Ok(docker);
                }
                Err(e) => debug!("Runtime at {} did not answer: {}", label, e),
            }
        }

        Err(RuntimeError::Other(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion, RuntimeError> {
        Ok(self.docker.version().await?)
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType, RuntimeError> {
        let version = self.version().await?;

        let is_podman = version.components.is_some_and(|components| {
            components
                .iter()
                .any(|c| c.name.to_lowercase().contains("podman"))
        });

        Ok(if is_podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        })
    }
}

async fn ping_with_retries(docker: &Docker, config: &ContainerClientConfig) -> Result<(), RuntimeError> {
    let attempts = config.retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match docker.ping().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(attempt, error = %e, "Runtime ping failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    Err(last_error.map_or_else(|| RuntimeError::Other("ping failed".to_string()), Into::into))
}

/// Host that published ports are reachable on, derived from `DOCKER_HOST`.
///
/// Remote daemons publish ports on their own address; local sockets publish
/// on the loopback interface.
fn resolve_host(docker_host: Option<&str>) -> String {
    docker_host
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| url::Url::parse(value).ok())
        .filter(|url| !matches!(url.scheme(), "unix" | "npipe"))
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| env::runtime::LOCALHOST.to_string())
}

/// Map a 404 from the daemon to [`RuntimeError::NotFound`].
fn not_found_or_api(target: &str, error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(target.to_string()),
        e => RuntimeError::Api(e),
    }
}

fn docker_credentials(credential: &RegistryCredential) -> DockerCredentials {
    DockerCredentials {
        username: credential.username.clone(),
        password: credential.password.clone(),
        serveraddress: credential.server_address.clone(),
        identitytoken: credential.identity_token.clone(),
        ..Default::default()
    }
}

fn bollard_config(spec: &ContainerSpec) -> bollard::container::Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();

    for port in spec.ports.distinct_ports() {
        exposed_ports.insert(port.key(), HashMap::new());
        port_bindings.insert(
            port.key(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("0".to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        binds: if spec.binds.is_empty() {
            None
        } else {
            Some(spec.binds.clone())
        },
        port_bindings: Some(port_bindings),
        privileged: Some(spec.privileged),
        ..Default::default()
    };

    bollard::container::Config {
        image: Some(spec.image.clone()),
        cmd: spec.cmd.clone(),
        env: if spec.env.is_empty() {
            None
        } else {
            Some(spec.env.clone())
        },
        labels: Some(
            spec.labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for ContainerClient {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::Api(e)),
        }
    }

    async fn pull_image(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), RuntimeError> {
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            credential.map(docker_credentials),
        );

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
            if let Some(progress) = info.progress {
                debug!("Pull progress: {}", progress);
            }
        }

        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, RuntimeError> {
        let options = bollard::container::CreateContainerOptions {
            name,
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), bollard_config(spec))
            .await?;

        for warning in &response.warnings {
            debug!(name = %name, "Runtime warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or_api(id, e))
    }

    async fn inspect_ports(&self, id: &str) -> Result<Vec<HostBinding>, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| not_found_or_api(id, e))?;

        let ports = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut bindings = Vec::new();
        for (key, published) in ports {
            let Ok(port) = key.parse::<Port>() else {
                debug!(key = %key, "Ignoring unrecognized port key");
                continue;
            };

            let host_port = published
                .unwrap_or_default()
                .into_iter()
                .filter_map(|binding| binding.host_port)
                .filter_map(|host_port| host_port.parse::<u16>().ok())
                .find(|host_port| *host_port != 0);

            if let Some(host_port) = host_port {
                bindings.push(HostBinding { port, host_port });
            }
        }

        Ok(bindings)
    }

    fn logs(&self, id: &str) -> LogStream {
        let stream = self.docker.logs(
            id,
            Some(bollard::container::LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        Box::pin(stream.map(|item| {
            item.map(|output| output.into_bytes().to_vec())
                .map_err(RuntimeError::from)
        }))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = bollard::container::StopContainerOptions {
            t: timeout.as_secs() as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was not running", id);
                Ok(())
            }
            Err(e) => Err(not_found_or_api(id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| not_found_or_api(id, e))
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, NamedPorts};

    #[test]
    fn test_resolve_host() {
        assert_eq!(resolve_host(None), "127.0.0.1");
        assert_eq!(resolve_host(Some("")), "127.0.0.1");
        assert_eq!(resolve_host(Some("unix:///var/run/docker.sock")), "127.0.0.1");
        assert_eq!(resolve_host(Some("tcp://192.168.99.100:2376")), "192.168.99.100");
        assert_eq!(resolve_host(Some("ssh://builder@build-box")), "build-box");
        assert_eq!(resolve_host(Some("not a url")), "127.0.0.1");
    }

    #[test]
    fn test_bollard_config_publishes_every_port() {
        let ports = NamedPorts::new()
            .with("web", Port::tcp(80))
            .with("alt", Port::tcp(80))
            .with("dns", Port::udp(53));
        let spec = ContainerConfig::builder()
            .image("nginx")
            .ports(ports)
            .env("A", "1")
            .host_mount("/tmp", "/data")
            .build()
            .unwrap()
            .spec;

        let config = bollard_config(&spec);

        let exposed = config.exposed_ports.unwrap();
        assert_eq!(exposed.len(), 2);
        assert!(exposed.contains_key("80/tcp"));
        assert!(exposed.contains_key("53/udp"));

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.port_bindings.unwrap().len(), 2);
        assert_eq!(host_config.binds, Some(vec!["/tmp:/data".to_string()]));
        assert_eq!(config.env, Some(vec!["A=1".to_string()]));
        assert_eq!(config.image.as_deref(), Some("nginx:latest"));
        assert!(config.labels.unwrap().contains_key(env::MANAGED_LABEL));
    }

    #[test]
    fn test_credentials_mapping() {
        let credential = RegistryCredential::basic("me", "secret").for_server("ghcr.io");
        let mapped = docker_credentials(&credential);
        assert_eq!(mapped.username.as_deref(), Some("me"));
        assert_eq!(mapped.serveraddress.as_deref(), Some("ghcr.io"));
        assert!(mapped.identitytoken.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = ContainerClient::new().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_runtime_detection() {
        let client = ContainerClient::new().await.unwrap();
        let runtime_type = client.runtime_type().await.unwrap();
        println!("Runtime type: {}", runtime_type);
    }

    #[tokio::test]
    #[ignore]
    async fn test_missing_container_is_not_found() {
        let client = ContainerClient::new().await.unwrap();
        let err = client.remove_container("stevedore-missing").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }
}
