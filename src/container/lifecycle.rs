//! Runtime lifecycle of a single container.
//!
//! Each call is one round trip to the runtime. The manager owns the
//! create-then-start sequence so a container that was created but failed to
//! start is removed before the error reaches the caller.

use crate::container::{ContainerError, ContainerRuntime, ContainerSpec, Result, RuntimeError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates, starts, stops and removes containers through the runtime.
pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    stop_timeout: Duration,
}

impl ContainerLifecycleManager {
    /// Create a lifecycle manager; `stop_timeout` is the grace period a
    /// container gets before it is killed.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, stop_timeout: Duration) -> Self {
        Self {
            runtime,
            stop_timeout,
        }
    }

    /// Create a container from `spec` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ContainerStart`] if creation fails.
    pub async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        debug!(name = %name, image = %spec.image, "Creating container");

        let id = self
            .runtime
            .create_container(name, spec)
            .await
            .map_err(|source| ContainerError::ContainerStart {
                target: spec.image.clone(),
                source,
            })?;

        info!("Created container: {} ({})", name, short_id(&id));
        Ok(id)
    }

    /// Start a created container.
    pub async fn start(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        debug!("Starting container: {}", short_id(id));
        self.runtime.start_container(id).await?;
        info!("Started container: {}", short_id(id));
        Ok(())
    }

    /// Create and start a container, removing it again if the start fails.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ContainerStart`] if creation or start fails.
    pub async fn create_and_start(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let id = self.create(name, spec).await?;

        if let Err(source) = self.start(&id).await {
            warn!(
                container_id = %short_id(&id),
                error = %source,
                "Container failed to start, removing it"
            );
            if let Err(e) = self.remove(&id).await {
                warn!(
                    container_id = %short_id(&id),
                    error = %e,
                    "Failed to remove container that did not start"
                );
            }
            return Err(ContainerError::ContainerStart {
                target: spec.image.clone(),
                source,
            });
        }

        Ok(id)
    }

    /// Stop a container. Already stopped or missing containers are fine.
    pub async fn stop(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        debug!("Stopping container: {}", short_id(id));

        match self.runtime.stop_container(id, self.stop_timeout).await {
            Ok(()) => {
                info!("Stopped container: {}", short_id(id));
                Ok(())
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!("Container {} already gone", short_id(id));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a container. Missing containers are fine.
    pub async fn remove(&self, id: &str) -> std::result::Result<(), RuntimeError> {
        debug!("Removing container: {}", short_id(id));

        match self.runtime.remove_container(id).await {
            Ok(()) => {
                info!("Removed container: {}", short_id(id));
                Ok(())
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!("Container {} already removed", short_id(id));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// First 12 characters of a container id, for log lines.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
