//! Container startup orchestration.
//!
//! Composes configuration, image acquisition, lifecycle, port resolution, log
//! relay, readiness polling and the init hook into `start` and `stop`. A start
//! that fails after the container was created removes it again before the
//! error is returned.

#[cfg(feature = "docker")]
use crate::container::ContainerClient;
use crate::container::lifecycle::short_id;
use crate::container::{
    Container, ContainerConfig, ContainerError, ContainerLifecycleManager, ContainerOption,
    ContainerRuntime, HealthCheckCoordinator, ImageAcquisition, LogRelay, NamedPorts,
    PortResolver, Result, RuntimeError, WaitToken, run_init_hook, tcp_health_check,
};
use crate::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Container orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ContainerOrchestratorConfig {
    /// Container name prefix
    pub name_prefix: String,
    /// Grace period before a stopping container is killed
    pub stop_timeout: Duration,
    /// Upper bound on a whole stop
    pub teardown_timeout: Duration,
    /// Upper bound on waiting for the log relay during stop
    pub log_drain_timeout: Duration,
    /// Inspections before a port without host binding fails the start
    pub port_wait_attempts: u32,
    /// Pause between port inspections
    pub port_wait_interval: Duration,
}

impl Default for ContainerOrchestratorConfig {
    fn default() -> Self {
        Self {
            name_prefix: env::runtime::DEFAULT_NAME_PREFIX.to_string(),
            stop_timeout: env::runtime::DEFAULT_STOP_TIMEOUT,
            teardown_timeout: env::runtime::DEFAULT_TEARDOWN_TIMEOUT,
            log_drain_timeout: env::runtime::DEFAULT_LOG_DRAIN_TIMEOUT,
            port_wait_attempts: env::runtime::DEFAULT_PORT_WAIT_ATTEMPTS,
            port_wait_interval: env::runtime::DEFAULT_PORT_WAIT_INTERVAL,
        }
    }
}

/// High-level container orchestrator.
///
/// Starts ready-to-use containers and tears them down again. One orchestrator
/// can serve any number of concurrent starts and stops.
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerOrchestratorConfig,
    images: ImageAcquisition,
    lifecycle: ContainerLifecycleManager,
    ports: PortResolver,
}

impl ContainerOrchestrator {
    /// Create a new orchestrator connected to the local Docker or Podman
    /// daemon.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    #[cfg(feature = "docker")]
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerOrchestratorConfig::default()).await
    }

    /// Create a new orchestrator with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    #[cfg(feature = "docker")]
    pub async fn with_config(config: ContainerOrchestratorConfig) -> Result<Self> {
        let client = ContainerClient::new().await?;
        Ok(Self::with_runtime(Arc::new(client), config))
    }

    /// Create an orchestrator on top of an existing runtime.
    pub fn with_runtime(
        runtime: Arc<dyn ContainerRuntime>,
        config: ContainerOrchestratorConfig,
    ) -> Self {
        Self {
            images: ImageAcquisition::new(runtime.clone()),
            lifecycle: ContainerLifecycleManager::new(runtime.clone(), config.stop_timeout),
            ports: PortResolver::new(
                runtime.clone(),
                config.port_wait_attempts,
                config.port_wait_interval,
            ),
            runtime,
            config,
        }
    }

    /// Get the underlying runtime.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Get the orchestrator configuration.
    pub fn config(&self) -> &ContainerOrchestratorConfig {
        &self.config
    }

    /// Start a container from `image` exposing `ports` and wait until it is
    /// ready.
    ///
    /// Options are applied in order; see [`ContainerOption`].
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Configuration`] for invalid input, before the
    /// runtime is touched. Every other failure is reported after the created
    /// container (if any) was torn down.
    pub async fn start<S, P, I>(&self, image: S, ports: P, options: I) -> Result<Container>
    where
        S: Into<String>,
        P: Into<NamedPorts>,
        I: IntoIterator<Item = ContainerOption>,
    {
        let config = ContainerConfig::from_options(image, ports, options)?;
        self.start_with_config(config).await
    }

    /// Start a container from an already built configuration.
    ///
    /// # Errors
    ///
    /// See [`ContainerOrchestrator::start`].
    pub async fn start_with_config(&self, config: ContainerConfig) -> Result<Container> {
        let ContainerConfig {
            spec,
            wait,
            health_check,
            init,
            log_sink,
        } = config;

        self.images
            .ensure(
                &spec.image,
                spec.registry_auth.as_ref(),
                spec.use_local_images_first,
            )
            .await?;

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.config.name_prefix, uuid::Uuid::new_v4()));

        let id = self.lifecycle.create_and_start(&name, &spec).await?;

        let ports = match self.ports.resolve(&id, &spec.ports).await {
            Ok(ports) => ports,
            Err(e) => {
                self.discard(&id).await;
                return Err(e);
            }
        };

        let relay = LogRelay::attach(&self.runtime, &id, log_sink);
        let container = Container::new(
            id,
            name,
            spec.image.clone(),
            self.runtime.host().to_string(),
            ports,
            relay,
        );

        let check = health_check.unwrap_or_else(tcp_health_check);
        let token = WaitToken::new(wait.cancellation.clone(), Some(wait.timeout));
        let coordinator = HealthCheckCoordinator::new(wait.interval);

        debug!(
            container_id = %short_id(&container.id),
            timeout = ?wait.timeout,
            interval = ?wait.interval,
            "Waiting for container to become ready"
        );

        if let Err(e) = coordinator.wait_until_ready(&container, &check, &token).await {
            warn!(container_id = %short_id(&container.id), error = %e, "Container never became ready");
            self.cleanup(&container).await;
            return Err(e);
        }

        if let Some(init) = &init {
            let outcome = tokio::select! {
                biased;
                _ = token.fired() => Err(token.error(None)),
                result = run_init_hook(token.cancellation(), &container, init) => result,
            };

            if let Err(e) = outcome {
                self.cleanup(&container).await;
                return Err(e);
            }
        }

        info!(
            container_id = %short_id(&container.id),
            name = %container.name,
            image = %container.image,
            "Container is up"
        );
        Ok(container)
    }

    /// Stop and remove a container.
    ///
    /// `None` and already stopped containers are accepted and do nothing.
    /// The whole teardown is bounded by
    /// [`ContainerOrchestratorConfig::teardown_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Teardown`] if the runtime fails to stop or
    /// remove the container, or the bound elapses.
    pub async fn stop<'a>(&self, container: impl Into<Option<&'a Container>>) -> Result<()> {
        let Some(container) = container.into() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.teardown_timeout, self.teardown(container)).await {
            Ok(result) => result,
            Err(_) => Err(ContainerError::Teardown {
                id: container.id.clone(),
                source: RuntimeError::Other(format!(
                    "teardown did not finish within {:?}",
                    self.config.teardown_timeout
                )),
            }),
        }
    }

    async fn teardown(&self, container: &Container) -> Result<()> {
        let mut state = container.teardown_state().await;
        if state.stopped {
            debug!(container_id = %short_id(&container.id), "Container already stopped");
            return Ok(());
        }

        let failed = |source| ContainerError::Teardown {
            id: container.id.clone(),
            source,
        };

        // Removal is forced, so it still runs when stop failed
        let stopped = self.lifecycle.stop(&container.id).await;

        if let Some(mut relay) = state.relay.take() {
            match &stopped {
                Ok(()) => relay.drain(self.config.log_drain_timeout).await,
                // A running container never ends its log stream
                Err(_) => relay.cancel(),
            }
        }

        let removed = self.lifecycle.remove(&container.id).await;
        if removed.is_ok() {
            state.stopped = true;
        }

        match (stopped, removed) {
            (Err(e), removed) => {
                if let Err(remove_error) = removed {
                    warn!(
                        container_id = %short_id(&container.id),
                        error = %remove_error,
                        "Failed to remove container after failed stop"
                    );
                }
                Err(failed(e))
            }
            (Ok(()), Err(e)) => Err(failed(e)),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Tear down a container whose start failed. Errors are logged only, the
    /// caller reports the original failure.
    async fn cleanup(&self, container: &Container) {
        if let Err(e) = self.stop(container).await {
            warn!(
                container_id = %short_id(&container.id),
                error = %e,
                "Failed to clean up container after failed start"
            );
        }
    }

    /// Remove a started container that never got a handle.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.lifecycle.stop(id).await {
            warn!(container_id = %short_id(id), error = %e, "Failed to stop container");
        }
        if let Err(e) = self.lifecycle.remove(id).await {
            warn!(container_id = %short_id(id), error = %e, "Failed to remove container");
        }
    }
}
