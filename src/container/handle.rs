//! The caller-visible handle of a started container.

use crate::container::{DEFAULT_PORT_NAME, LogRelay, ResolvedPorts};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Teardown bookkeeping shared by all clones of a [`Container`].
#[derive(Debug, Default)]
pub(crate) struct TeardownState {
    pub(crate) relay: Option<LogRelay>,
    pub(crate) stopped: bool,
}

/// A running, ready container.
///
/// Only handed out once the health check passed and the init hook (if any)
/// succeeded. Ports and identity never change afterwards; clones share the
/// same teardown state, so stopping any clone stops them all.
#[derive(Debug, Clone, Serialize)]
pub struct Container {
    /// Runtime container id
    pub id: String,
    /// Container name
    pub name: String,
    /// Image the container runs
    pub image: String,
    /// Host that published ports are reachable on
    pub host: String,
    /// One binding per requested named port
    pub ports: ResolvedPorts,
    /// When the container became ready
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    teardown: Arc<Mutex<TeardownState>>,
}

impl Container {
    pub(crate) fn new(
        id: String,
        name: String,
        image: String,
        host: String,
        ports: ResolvedPorts,
        relay: LogRelay,
    ) -> Self {
        Self {
            id,
            name,
            image,
            host,
            ports,
            started_at: Utc::now(),
            teardown: Arc::new(Mutex::new(TeardownState {
                relay: Some(relay),
                stopped: false,
            })),
        }
    }

    /// `host:port` address of a named port.
    pub fn address(&self, name: &str) -> Option<String> {
        self.ports.get(name).map(|binding| binding.address())
    }

    /// Host-side port of a named port.
    pub fn port(&self, name: &str) -> Option<u16> {
        self.ports.get(name).map(|binding| binding.host_port)
    }

    /// Address of the port declared through the single-port convenience
    /// constructors, or an empty string.
    pub fn default_address(&self) -> String {
        self.address(DEFAULT_PORT_NAME).unwrap_or_default()
    }

    /// Host-side port declared through the single-port convenience
    /// constructors, or `0`.
    pub fn default_port(&self) -> u16 {
        self.port(DEFAULT_PORT_NAME).unwrap_or_default()
    }

    /// Whether the container was already stopped through this handle.
    pub async fn is_stopped(&self) -> bool {
        self.teardown.lock().await.stopped
    }

    pub(crate) async fn teardown_state(&self) -> MutexGuard<'_, TeardownState> {
        self.teardown.lock().await
    }
}
