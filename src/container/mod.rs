//! Ephemeral container orchestration.
//!
//! This module starts a container from an image, waits until the service inside
//! is reachable, optionally runs a setup callback, and hands back a [`Container`]
//! with resolved addresses. Any failure after the container was created tears it
//! down before the error is returned.
//!
//! ## Architecture
//!
//! The container module is organized into several components:
//!
//! - [`config`]: Option folding into an immutable container configuration
//! - [`image`]: Pull-or-reuse policy for images
//! - [`lifecycle`]: Create, start, stop and remove through the runtime
//! - [`ports`]: Named ports and their runtime-assigned host bindings
//! - [`logs`]: Background relay of container output into a caller sink
//! - [`health`]: Readiness polling under a cancellation/deadline token
//! - [`init`]: One-shot post-readiness hook
//! - [`orchestrator`]: Composition of the above into `start` and `stop`
//! - [`runtime`]: The capability set expected from a container runtime
//! - [`client`]: Docker/Podman implementation of the runtime over bollard
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stevedore::container::{ContainerOption, ContainerOrchestrator, NamedPorts, Port};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::new().await?;
//!
//!     let ports = NamedPorts::new()
//!         .with("web", Port::tcp(80))
//!         .with("admin", Port::tcp(8080));
//!
//!     let container = orchestrator
//!         .start(
//!             "docker.io/library/nginx:alpine",
//!             ports,
//!             vec![
//!                 ContainerOption::Timeout(Duration::from_secs(30)),
//!                 ContainerOption::Env("NGINX_ENTRYPOINT_QUIET_LOGS=1".to_string()),
//!             ],
//!         )
//!         .await?;
//!
//!     println!("web is at {:?}", container.address("web"));
//!
//!     orchestrator.stop(&container).await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "docker")]
mod client;
mod config;
mod handle;
mod health;
mod image;
mod init;
mod lifecycle;
mod logs;
mod orchestrator;
mod ports;
mod runtime;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "docker")]
pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{
    ContainerConfig, ContainerConfigBuilder, ContainerOption, ContainerSpec, RegistryCredential,
    WaitConfig,
};
pub use handle::Container;
pub use health::{HealthCheckCoordinator, HealthCheckFn, WaitToken, health_check, tcp_health_check};
pub use image::{ImageAcquisition, normalize_reference};
pub use init::{InitFn, init_fn, run_init_hook};
pub use lifecycle::ContainerLifecycleManager;
pub use logs::{LogRelay, LogSink};
pub use orchestrator::{ContainerOrchestrator, ContainerOrchestratorConfig};
pub use ports::{
    DEFAULT_PORT_NAME, NamedPorts, Port, PortBinding, PortResolver, Protocol, ResolvedPorts,
};
pub use runtime::{ContainerRuntime, HostBinding, LogStream};

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed error produced by caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future returned by health-check and init callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by the container runtime itself.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Docker/Podman API error
    #[cfg(feature = "docker")]
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// Container or image not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// General runtime error
    #[error("Runtime error: {0}")]
    Other(String),
}

/// Container orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Malformed configuration, detected before the runtime is touched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Image lookup or pull failed
    #[error("Failed to acquire image {image}: {source}")]
    ImageAcquisition {
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// Container could not be created, started or bound to its ports
    #[error("Failed to start container {target}: {source}")]
    ContainerStart {
        target: String,
        #[source]
        source: RuntimeError,
    },

    /// The caller cancelled the readiness wait
    #[error("Container startup cancelled")]
    Cancelled,

    /// The deadline elapsed before the health check passed
    #[error("Container did not become ready within {timeout:?}")]
    HealthCheckTimeout {
        timeout: Duration,
        last_error: Option<String>,
    },

    /// The init callback failed; the callback's error is the source
    #[error("Init hook failed: {0}")]
    InitHook(#[source] BoxError),

    /// Lookup for a port that was never requested
    #[error("Port {protocol}/{port} not found")]
    PortNotFound { protocol: Protocol, port: u16 },

    /// Stop or removal failed
    #[error("Failed to tear down container {id}: {source}")]
    Teardown {
        id: String,
        #[source]
        source: RuntimeError,
    },

    /// Runtime failure outside the categories above
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Coarse classification of a [`ContainerError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ImageAcquisition,
    ContainerStart,
    Cancelled,
    HealthCheckTimeout,
    InitHook,
    PortNotFound,
    Teardown,
    Runtime,
}

impl ContainerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::Configuration(_) => ErrorKind::Configuration,
            ContainerError::ImageAcquisition { .. } => ErrorKind::ImageAcquisition,
            ContainerError::ContainerStart { .. } => ErrorKind::ContainerStart,
            ContainerError::Cancelled => ErrorKind::Cancelled,
            ContainerError::HealthCheckTimeout { .. } => ErrorKind::HealthCheckTimeout,
            ContainerError::InitHook(_) => ErrorKind::InitHook,
            ContainerError::PortNotFound { .. } => ErrorKind::PortNotFound,
            ContainerError::Teardown { .. } => ErrorKind::Teardown,
            ContainerError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// Canonical HTTP status code for outward-facing services.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Configuration => 400,
            ErrorKind::PortNotFound => 404,
            ErrorKind::Cancelled => 499,
            ErrorKind::ImageAcquisition => 502,
            ErrorKind::HealthCheckTimeout => 504,
            ErrorKind::ContainerStart
            | ErrorKind::InitHook
            | ErrorKind::Teardown
            | ErrorKind::Runtime => 500,
        }
    }

    /// Whether the caller's cancellation token ended the startup.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ContainerError::Cancelled)
    }

    /// Whether the configured deadline ended the startup.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ContainerError::HealthCheckTimeout { .. })
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
