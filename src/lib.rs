//! # Stevedore
//!
//! Ephemeral service containers for integration tests. Stevedore starts a
//! container from an image, waits until the service inside answers, optionally
//! runs a setup callback against it, and hands back host-reachable addresses
//! for every named port. Stopping the container removes it again.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: Container startup engine. Configuration, image
//!   acquisition, lifecycle, port resolution, log relay, readiness polling,
//!   init hook and the orchestrator composing them
//! - **[`cli`]**: Argument parsing and TOML run profiles for the `stevedore`
//!   binary
//! - **[`env`]**: Defaults, label names and environment variable names
//!
//! ## Features
//!
//! ### Readiness
//! - **Health checks**: Caller-supplied async predicate, or a TCP dial of every
//!   TCP port by default
//! - **Bounded waits**: Deadline and cancellation token, reported as distinct
//!   errors
//! - **Init hooks**: One-shot setup callback once the service is ready
//!
//! ### Cleanup
//! - **No leaks**: Any failure after creation tears the container down before
//!   the error is returned
//! - **Idempotent stop**: Stopping twice, or stopping nothing, succeeds
//! - **Log relay**: Container output reaches the caller's sink before `stop`
//!   returns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stevedore::{ContainerOption, ContainerOrchestrator, NamedPorts};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::new().await?;
//!
//!     let container = orchestrator
//!         .start(
//!             "docker.io/library/redis:7",
//!             NamedPorts::default_tcp(6379),
//!             vec![ContainerOption::Timeout(Duration::from_secs(60))],
//!         )
//!         .await?;
//!
//!     println!("redis is at {}", container.default_address());
//!
//!     orchestrator.stop(&container).await?;
//!     Ok(())
//! }
//! ```

/// Container startup engine.
///
/// Starts ready-to-use containers and tears them down again, through the
/// [`container::ContainerRuntime`] seam.
pub mod container;

/// Environment constants and path utilities.
///
/// Centralizes defaults, label names and environment variable names used
/// throughout the crate.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main container types
#[cfg(feature = "docker")]
pub use container::ContainerClient;
pub use container::{
    Container, ContainerConfig, ContainerError, ContainerOption, ContainerOrchestrator,
    ContainerOrchestratorConfig, ContainerRuntime, ErrorKind, NamedPorts, Port, Protocol,
    RegistryCredential, ResolvedPorts,
};
