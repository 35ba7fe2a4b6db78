//! Container configuration.
//!
//! Options are applied in the order they are supplied onto a
//! [`ContainerConfigBuilder`]. List-valued options (environment, command
//! arguments, labels, host mounts) accumulate; every other option is
//! last-write-wins. The builder validates the result into an immutable
//! [`ContainerConfig`] without touching the runtime.

use crate::container::{
    BoxError, Container, ContainerError, HealthCheckFn, InitFn, LogSink, NamedPorts, Result,
    health_check, init_fn, normalize_reference,
};
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Credential forwarded to the runtime when pulling from a private registry.
///
/// An empty credential means an anonymous pull.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredential {
    /// Registry user name
    pub username: Option<String>,
    /// Registry password
    pub password: Option<String>,
    /// Registry address, e.g. `ghcr.io`
    pub server_address: Option<String>,
    /// Identity token issued by the registry
    pub identity_token: Option<String>,
}

impl RegistryCredential {
    /// User name and password credential.
    pub fn basic<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Identity token credential.
    pub fn token<T: Into<String>>(token: T) -> Self {
        Self {
            identity_token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Restrict the credential to one registry.
    pub fn for_server<S: Into<String>>(mut self, server: S) -> Self {
        self.server_address = Some(server.into());
        self
    }

    /// Whether this credential carries nothing to authenticate with.
    pub fn is_anonymous(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(str::is_empty);
        blank(&self.username) && blank(&self.password) && blank(&self.identity_token)
    }
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("server_address", &self.server_address)
            .field(
                "identity_token",
                &self.identity_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// What gets created at the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    /// Normalized image reference
    pub image: String,
    /// Requested ports
    pub ports: NamedPorts,
    /// Environment in `KEY=VALUE` form, in supplied order
    pub env: Vec<String>,
    /// Command override
    pub cmd: Option<Vec<String>>,
    /// Credential for pulling the image
    #[serde(skip)]
    pub registry_auth: Option<RegistryCredential>,
    /// Skip the pull when the image is already present locally
    pub use_local_images_first: bool,
    /// Explicit container name
    pub name: Option<String>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
    /// Host mounts in `source:target` form
    pub binds: Vec<String>,
    /// Run privileged
    pub privileged: bool,
}

/// Bounds on the readiness wait.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Deadline for the health check, measured from the start of the wait
    pub timeout: Duration,
    /// Pause between failed health-check attempts
    pub interval: Duration,
    /// Explicit caller cancellation
    pub cancellation: CancellationToken,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: env::DEFAULT_TIMEOUT,
            interval: env::DEFAULT_HEALTH_CHECK_INTERVAL,
            cancellation: CancellationToken::new(),
        }
    }
}

/// A single recognized start option.
pub enum ContainerOption {
    /// Cancellation token bounding the health-check wait
    Cancellation(CancellationToken),
    /// Deadline for the health-check wait
    Timeout(Duration),
    /// Readiness predicate
    HealthCheck(HealthCheckFn),
    /// Pause between failed health checks
    HealthCheckInterval(Duration),
    /// One-shot callback run after the container is ready
    Init(InitFn),
    /// Environment assignment in `KEY=VALUE` form
    Env(String),
    /// Command arguments, appended to any earlier ones
    Command(Vec<String>),
    /// Credential forwarded to the image pull
    RegistryAuth(RegistryCredential),
    /// Skip the pull when the image is already present locally
    UseLocalImagesFirst(bool),
    /// Destination for combined container output
    LogSink(LogSink),
    /// Container name
    Name(String),
    /// Container label
    Label(String, String),
    /// Host directory mounted into the container
    HostMount { source: String, target: String },
    /// Run the container in privileged mode
    Privileged(bool),
}

impl ContainerOption {
    /// Health-check option from an async closure.
    pub fn health_check<F, Fut>(check: F) -> Self
    where
        F: Fn(CancellationToken, Container) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        ContainerOption::HealthCheck(health_check(check))
    }

    /// Init option from an async closure.
    pub fn init<F, Fut>(init: F) -> Self
    where
        F: Fn(CancellationToken, Container) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        ContainerOption::Init(init_fn(init))
    }

    /// Log sink option from any async writer.
    pub fn log_sink<W>(writer: W) -> Self
    where
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        ContainerOption::LogSink(Box::new(writer))
    }

    fn apply(self, builder: ContainerConfigBuilder) -> ContainerConfigBuilder {
        match self {
            ContainerOption::Cancellation(token) => builder.cancellation(token),
            ContainerOption::Timeout(timeout) => builder.timeout(timeout),
            ContainerOption::HealthCheck(check) => builder.health_check_fn(check),
            ContainerOption::HealthCheckInterval(interval) => builder.health_check_interval(interval),
            ContainerOption::Init(init) => builder.init_fn(init),
            ContainerOption::Env(entry) => builder.env_entry(entry),
            ContainerOption::Command(args) => builder.cmd(args),
            ContainerOption::RegistryAuth(credential) => builder.registry_auth(credential),
            ContainerOption::UseLocalImagesFirst(enable) => builder.use_local_images_first(enable),
            ContainerOption::LogSink(sink) => builder.log_sink_boxed(sink),
            ContainerOption::Name(name) => builder.name(name),
            ContainerOption::Label(key, value) => builder.label(key, value),
            ContainerOption::HostMount { source, target } => builder.host_mount(source, target),
            ContainerOption::Privileged(enable) => builder.privileged(enable),
        }
    }
}

impl fmt::Debug for ContainerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerOption::Cancellation(_) => f.write_str("Cancellation"),
            ContainerOption::Timeout(t) => f.debug_tuple("Timeout").field(t).finish(),
            ContainerOption::HealthCheck(_) => f.write_str("HealthCheck"),
            ContainerOption::HealthCheckInterval(i) => {
                f.debug_tuple("HealthCheckInterval").field(i).finish()
            }
            ContainerOption::Init(_) => f.write_str("Init"),
            ContainerOption::Env(e) => f.debug_tuple("Env").field(e).finish(),
            ContainerOption::Command(c) => f.debug_tuple("Command").field(c).finish(),
            ContainerOption::RegistryAuth(c) => f.debug_tuple("RegistryAuth").field(c).finish(),
            ContainerOption::UseLocalImagesFirst(b) => {
                f.debug_tuple("UseLocalImagesFirst").field(b).finish()
            }
            ContainerOption::LogSink(_) => f.write_str("LogSink"),
            ContainerOption::Name(n) => f.debug_tuple("Name").field(n).finish(),
            ContainerOption::Label(k, v) => f.debug_tuple("Label").field(k).field(v).finish(),
            ContainerOption::HostMount { source, target } => f
                .debug_struct("HostMount")
                .field("source", source)
                .field("target", target)
                .finish(),
            ContainerOption::Privileged(b) => f.debug_tuple("Privileged").field(b).finish(),
        }
    }
}

/// Container configuration builder.
///
/// Provides a fluent interface for constructing container configurations
/// with sane defaults and validation.
pub struct ContainerConfigBuilder {
    image: Option<String>,
    ports: NamedPorts,
    env: Vec<String>,
    cmd: Option<Vec<String>>,
    registry_auth: Option<RegistryCredential>,
    use_local_images_first: bool,
    name: Option<String>,
    labels: BTreeMap<String, String>,
    binds: Vec<String>,
    privileged: bool,
    wait: WaitConfig,
    health_check: Option<HealthCheckFn>,
    init: Option<InitFn>,
    log_sink: Option<LogSink>,
}

impl Default for ContainerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self {
            image: None,
            ports: NamedPorts::new(),
            env: Vec::new(),
            cmd: None,
            registry_auth: None,
            use_local_images_first: false,
            name: None,
            labels: BTreeMap::new(),
            binds: Vec::new(),
            privileged: false,
            wait: WaitConfig::default(),
            health_check: None,
            init: None,
            log_sink: None,
        }
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the expected ports.
    pub fn ports<P: Into<NamedPorts>>(mut self, ports: P) -> Self {
        self.ports = ports.into();
        self
    }

    /// Apply options in order.
    pub fn options<I>(self, options: I) -> Self
    where
        I: IntoIterator<Item = ContainerOption>,
    {
        options.into_iter().fold(self, |builder, option| option.apply(builder))
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(self, key: K, value: V) -> Self {
        self.env_entry(format!("{}={}", key.into(), value.into()))
    }

    /// Add a raw `KEY=VALUE` environment entry.
    pub fn env_entry<S: Into<String>>(mut self, entry: S) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Append command arguments.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd
            .get_or_insert_with(Vec::new)
            .extend(cmd.into_iter().map(|s| s.into()));
        self
    }

    pub fn registry_auth(mut self, credential: RegistryCredential) -> Self {
        self.registry_auth = Some(credential);
        self
    }

    pub fn use_local_images_first(mut self, enable: bool) -> Self {
        self.use_local_images_first = enable;
        self
    }

    /// Set the container name.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a label to the container.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Mount a host path into the container.
    pub fn host_mount<S: Into<String>, T: Into<String>>(mut self, source: S, target: T) -> Self {
        self.binds
            .push(format!("{}:{}", source.into(), target.into()));
        self
    }

    /// Run container in privileged mode.
    pub fn privileged(mut self, enable: bool) -> Self {
        self.privileged = enable;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.wait.cancellation = token;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.wait.interval = interval;
        self
    }

    pub fn health_check_fn(mut self, check: HealthCheckFn) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn init_fn(mut self, init: InitFn) -> Self {
        self.init = Some(init);
        self
    }

    /// Relay container output into `writer`.
    pub fn log_sink<W>(self, writer: W) -> Self
    where
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        self.log_sink_boxed(Box::new(writer))
    }

    fn log_sink_boxed(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Build the container configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Configuration`] if required fields are
    /// missing or invalid.
    pub fn build(self) -> Result<ContainerConfig> {
        let image = self
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ContainerError::Configuration("Image is required".to_string()))?;

        if self.ports.is_empty() {
            return Err(ContainerError::Configuration(
                "At least one port is required".to_string(),
            ));
        }

        if let Some((name, port)) = self.ports.iter().find(|(_, port)| port.port == 0) {
            return Err(ContainerError::Configuration(format!(
                "Port '{}' has invalid number {}",
                name, port.port
            )));
        }

        if let Some((name, _)) = self.ports.iter().find(|(name, _)| name.trim().is_empty()) {
            return Err(ContainerError::Configuration(format!(
                "Port name '{}' must not be blank",
                name
            )));
        }

        for entry in &self.env {
            match entry.split_once('=') {
                Some((key, _)) if !key.trim().is_empty() => {}
                _ => {
                    return Err(ContainerError::Configuration(format!(
                        "Environment entry '{}' must be in KEY=VALUE form",
                        entry
                    )));
                }
            }
        }

        if matches!(&self.cmd, Some(cmd) if cmd.is_empty()) {
            return Err(ContainerError::Configuration(
                "Command override must not be empty".to_string(),
            ));
        }

        if self.wait.interval.is_zero() {
            return Err(ContainerError::Configuration(
                "Health check interval must be greater than zero".to_string(),
            ));
        }

        if let Some((source, _)) = self
            .binds
            .iter()
            .filter_map(|bind| bind.split_once(':'))
            .find(|(source, target)| source.is_empty() || target.is_empty())
        {
            return Err(ContainerError::Configuration(format!(
                "Host mount '{}' needs both a source and a target",
                source
            )));
        }

        let mut labels = self.labels;
        labels.insert(env::MANAGED_LABEL.to_string(), "true".to_string());

        Ok(ContainerConfig {
            spec: ContainerSpec {
                image: normalize_reference(image),
                ports: self.ports,
                env: self.env,
                cmd: self.cmd,
                registry_auth: self.registry_auth,
                use_local_images_first: self.use_local_images_first,
                name: self.name,
                labels,
                binds: self.binds,
                privileged: self.privileged,
            },
            wait: self.wait,
            health_check: self.health_check,
            init: self.init,
            log_sink: self.log_sink,
        })
    }
}

/// Container configuration.
///
/// Holds everything a single start needs: the runtime-facing spec plus the
/// readiness policy and callbacks.
pub struct ContainerConfig {
    /// What gets created at the runtime
    pub spec: ContainerSpec,
    /// Bounds on the readiness wait
    pub wait: WaitConfig,
    /// Readiness predicate, a TCP dial of every TCP port when unset
    pub health_check: Option<HealthCheckFn>,
    /// Post-readiness callback
    pub init: Option<InitFn>,
    /// Destination for container output
    pub log_sink: Option<LogSink>,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Fold an ordered option sequence into a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Configuration`] for invalid input.
    pub fn from_options<S, P, I>(image: S, ports: P, options: I) -> Result<Self>
    where
        S: Into<String>,
        P: Into<NamedPorts>,
        I: IntoIterator<Item = ContainerOption>,
    {
        Self::builder()
            .image(image)
            .ports(ports)
            .options(options)
            .build()
    }

    /// Get the image name.
    pub fn image(&self) -> &str {
        &self.spec.image
    }
}

impl fmt::Debug for ContainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerConfig")
            .field("spec", &self.spec)
            .field("wait", &self.wait)
            .field("health_check", &self.health_check.is_some())
            .field("init", &self.init.is_some())
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}
