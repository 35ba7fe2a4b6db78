//! CLI-specific functionality for the stevedore binary
//!
//! This module contains argument parsing and run profile discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ExecutionMode, RunConfig, ShowProfileConfig};
pub use config::{MountProfile, ProfileDiscovery, ProfileError, RunProfile};
