//! Named ports and their resolution to host-reachable addresses.
//!
//! Callers declare the container-side ports they expect under logical names.
//! After the container starts, [`PortResolver`] asks the runtime which host
//! ports were assigned and assembles a [`ResolvedPorts`] keyed by those names.

use crate::container::{ContainerError, ContainerRuntime, HostBinding, Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Name registered by the single-port convenience constructors.
pub const DEFAULT_PORT_NAME: &str = "default";

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ContainerError::Configuration(format!(
                "Unknown protocol '{}', expected tcp or udp",
                other
            ))),
        }
    }
}

/// A container-side port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Protocol
    pub protocol: Protocol,
    /// Container-side port number
    pub port: u16,
}

impl Port {
    /// A TCP port.
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
        }
    }

    /// A UDP port.
    pub fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            port,
        }
    }

    /// Runtime key in the `80/tcp` form.
    pub fn key(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

impl FromStr for Port {
    type Err = ContainerError;

    /// Accepts `tcp/80`, `80/tcp` and a bare `80` (TCP).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ContainerError::Configuration(format!("Invalid port '{}'", s));

        let (protocol, number) = match s.split_once('/') {
            Some((left, right)) if left.parse::<u16>().is_ok() => (right.parse()?, left),
            Some((left, right)) => (left.parse()?, right),
            None => (Protocol::Tcp, s),
        };

        let port = number.trim().parse::<u16>().map_err(|_| invalid())?;
        Ok(Self { protocol, port })
    }
}

/// Logical port names mapped to the container-side ports they stand for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedPorts(HashMap<String, Port>);

impl NamedPorts {
    /// An empty set of named ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Single TCP port registered under [`DEFAULT_PORT_NAME`].
    pub fn default_tcp(port: u16) -> Self {
        Self::new().with(DEFAULT_PORT_NAME, Port::tcp(port))
    }

    /// Single UDP port registered under [`DEFAULT_PORT_NAME`].
    pub fn default_udp(port: u16) -> Self {
        Self::new().with(DEFAULT_PORT_NAME, Port::udp(port))
    }

    /// Add a named port, replacing any previous port with the same name.
    pub fn with<S: Into<String>>(mut self, name: S, port: Port) -> Self {
        self.insert(name, port);
        self
    }

    /// Insert a named port.
    pub fn insert<S: Into<String>>(&mut self, name: S, port: Port) -> Option<Port> {
        self.0.insert(name.into(), port)
    }

    /// Look up a port by name.
    pub fn get(&self, name: &str) -> Option<Port> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, port)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Port)> {
        self.0.iter().map(|(name, port)| (name.as_str(), *port))
    }

    /// Distinct container-side ports, sorted for stable runtime requests.
    pub fn distinct_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self.0.values().copied().collect();
        ports.sort_by_key(|p| (p.port, p.protocol));
        ports.dedup();
        ports
    }
}

impl From<HashMap<String, Port>> for NamedPorts {
    fn from(map: HashMap<String, Port>) -> Self {
        Self(map)
    }
}

impl<S: Into<String>> FromIterator<(S, Port)> for NamedPorts {
    fn from_iter<I: IntoIterator<Item = (S, Port)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, port)| (name.into(), port)).collect())
    }
}

/// A requested port together with the address it is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Logical name from [`NamedPorts`]
    pub name: String,
    /// Protocol
    pub protocol: Protocol,
    /// Container-side port
    pub container_port: u16,
    /// Host the port is reachable on
    pub host: String,
    /// Host-side port assigned by the runtime
    pub host_port: u16,
}

impl PortBinding {
    /// `host:port` address of this binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.host_port)
    }
}

/// Resolved bindings, exactly one per requested named port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedPorts {
    bindings: Vec<PortBinding>,
}

impl ResolvedPorts {
    /// Binding for a logical port name.
    pub fn get(&self, name: &str) -> Option<&PortBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Binding for a container-side port.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::PortNotFound`] when the port was never requested.
    pub fn find(&self, protocol: Protocol, container_port: u16) -> Result<&PortBinding> {
        self.bindings
            .iter()
            .find(|b| b.protocol == protocol && b.container_port == container_port)
            .ok_or(ContainerError::PortNotFound {
                protocol,
                port: container_port,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Assemble bindings from the runtime's view, or return the first
    /// requested port that has no host binding yet.
    pub(crate) fn assemble(
        requested: &NamedPorts,
        bound: &[HostBinding],
        host: &str,
    ) -> std::result::Result<Self, Port> {
        let mut bindings = Vec::with_capacity(requested.len());

        for (name, port) in requested.iter() {
            let host_port = bound
                .iter()
                .find(|b| b.port == port)
                .map(|b| b.host_port)
                .ok_or(port)?;

            bindings.push(PortBinding {
                name: name.to_string(),
                protocol: port.protocol,
                container_port: port.port,
                host: host.to_string(),
                host_port,
            });
        }

        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { bindings })
    }
}

/// Maps requested logical ports to runtime-assigned host addresses.
pub struct PortResolver {
    runtime: Arc<dyn ContainerRuntime>,
    attempts: u32,
    retry_delay: Duration,
}

impl PortResolver {
    /// Create a resolver that inspects the container up to `attempts` times.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            runtime,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Resolve every named port of a started container.
    ///
    /// Bindings can show up slightly after the start call returns, so the
    /// container is re-inspected until all requested ports are bound.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ContainerStart`] if a port never gets a host
    /// binding, or [`ContainerError::Runtime`] if inspection fails.
    pub async fn resolve(&self, container_id: &str, ports: &NamedPorts) -> Result<ResolvedPorts> {
        let host = self.runtime.host().to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let bound = self.runtime.inspect_ports(container_id).await?;

            match ResolvedPorts::assemble(ports, &bound, &host) {
                Ok(resolved) => {
                    debug!(
                        container_id = %container_id,
                        bindings = resolved.len(),
                        "Resolved container ports"
                    );
                    return Ok(resolved);
                }
                Err(missing) if attempt >= self.attempts => {
                    return Err(ContainerError::ContainerStart {
                        target: container_id.to_string(),
                        source: RuntimeError::Other(format!(
                            "port {} has no host binding",
                            missing
                        )),
                    });
                }
                Err(missing) => {
                    debug!(
                        container_id = %container_id,
                        port = %missing,
                        attempt,
                        "Port not bound yet"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::MockRuntime;

    fn two_ports() -> NamedPorts {
        NamedPorts::new()
            .with("web80", Port::tcp(80))
            .with("web8080", Port::tcp(8080))
    }

    #[test]
    fn test_port_parsing() {
        assert_eq!("tcp/80".parse::<Port>().unwrap(), Port::tcp(80));
        assert_eq!("53/udp".parse::<Port>().unwrap(), Port::udp(53));
        assert_eq!("8080".parse::<Port>().unwrap(), Port::tcp(8080));
        assert!("sctp/80".parse::<Port>().is_err());
        assert!("tcp/http".parse::<Port>().is_err());
    }

    #[test]
    fn test_port_key() {
        assert_eq!(Port::tcp(80).key(), "80/tcp");
        assert_eq!(Port::udp(53).key(), "53/udp");
    }

    #[test]
    fn test_default_convenience_registers_default_name() {
        let ports = NamedPorts::default_tcp(5432);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports.get(DEFAULT_PORT_NAME), Some(Port::tcp(5432)));
    }

    #[test]
    fn test_distinct_ports_dedups_shared_ports() {
        let ports = NamedPorts::new()
            .with("a", Port::tcp(80))
            .with("b", Port::tcp(80))
            .with("c", Port::udp(80));
        assert_eq!(ports.distinct_ports(), vec![Port::tcp(80), Port::udp(80)]);
    }

    #[test]
    fn test_assemble_one_binding_per_name() {
        let bound = vec![
            HostBinding {
                port: Port::tcp(80),
                host_port: 49001,
            },
            HostBinding {
                port: Port::tcp(8080),
                host_port: 49002,
            },
        ];

        let resolved = ResolvedPorts::assemble(&two_ports(), &bound, "127.0.0.1").unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved.get("web80").unwrap().address(), "127.0.0.1:49001");
        assert_eq!(resolved.get("web8080").unwrap().host_port, 49002);
    }

    #[test]
    fn test_assemble_reports_missing_port() {
        let bound = vec![HostBinding {
            port: Port::tcp(80),
            host_port: 49001,
        }];

        let missing = ResolvedPorts::assemble(&two_ports(), &bound, "127.0.0.1").unwrap_err();
        assert_eq!(missing, Port::tcp(8080));
    }

    #[test]
    fn test_find_by_container_port() {
        let bound = vec![
            HostBinding {
                port: Port::tcp(80),
                host_port: 49001,
            },
            HostBinding {
                port: Port::tcp(8080),
                host_port: 49002,
            },
        ];
        let resolved = ResolvedPorts::assemble(&two_ports(), &bound, "localhost").unwrap();

        let binding = resolved.find(Protocol::Tcp, 8080).unwrap();
        assert_eq!(binding.name, "web8080");

        // Host-side ports are not lookup keys.
        assert!(matches!(
            resolved.find(Protocol::Tcp, 49001),
            Err(ContainerError::PortNotFound { port: 49001, .. })
        ));
        assert!(resolved.find(Protocol::Udp, 80).is_err());
        assert!(resolved.find(Protocol::Tcp, 1234).is_err());
    }

    #[tokio::test]
    async fn test_resolver_fails_for_never_bound_port() {
        let runtime = Arc::new(MockRuntime::new().with_unbound_port(Port::tcp(8080)));
        let id = runtime.started_container(&two_ports()).await;

        let resolver = PortResolver::new(runtime.clone(), 3, Duration::from_millis(1));
        let err = resolver.resolve(&id, &two_ports()).await.unwrap_err();

        assert!(matches!(err, ContainerError::ContainerStart { .. }));
        assert_eq!(runtime.count_calls("inspect"), 3);
    }

    #[tokio::test]
    async fn test_resolver_uses_runtime_host() {
        let runtime = Arc::new(MockRuntime::new().with_host("10.0.0.5"));
        let id = runtime.started_container(&two_ports()).await;

        let resolver = PortResolver::new(runtime, 1, Duration::from_millis(1));
        let resolved = resolver.resolve(&id, &two_ports()).await.unwrap();

        assert!(resolved.iter().all(|b| b.host == "10.0.0.5"));
    }
}
