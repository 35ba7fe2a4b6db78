//! Container runtime seam.
//!
//! The orchestrator only needs a handful of operations from the runtime. They
//! are collected in [`ContainerRuntime`] so the Docker/Podman client and test
//! doubles can be swapped behind an `Arc<dyn ContainerRuntime>`.

use crate::container::{ContainerSpec, Port, RegistryCredential, RuntimeError};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Combined stdout/stderr output of a container, chunk by chunk.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RuntimeError>> + Send>>;

/// Host port the runtime bound for a container-side port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostBinding {
    /// Container-side port
    pub port: Port,
    /// Host-side port
    pub host_port: u16,
}

/// Operations the orchestrator needs from a container runtime.
///
/// Implementations must be safe to share between concurrent starts and stops.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image is present in the local image store.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pull an image, anonymously when `credential` is `None`.
    async fn pull_image(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
    ) -> Result<(), RuntimeError>;

    /// Create a container and return its runtime id.
    async fn create_container(&self, name: &str, spec: &ContainerSpec)
    -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Current host bindings of a container's published ports.
    async fn inspect_ports(&self, id: &str) -> Result<Vec<HostBinding>, RuntimeError>;

    /// Follow the container's combined output until it stops.
    fn logs(&self, id: &str) -> LogStream;

    /// Stop a container, giving it `timeout` to exit before it is killed.
    ///
    /// Stopping an already stopped container succeeds; a missing container
    /// yields [`RuntimeError::NotFound`].
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Remove a container and its anonymous volumes.
    ///
    /// A missing container yields [`RuntimeError::NotFound`].
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Host name or IP that published ports are reachable on.
    fn host(&self) -> &str;
}
