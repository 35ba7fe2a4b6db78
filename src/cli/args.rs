//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `run`: Start a container from a run profile and/or flags, print it as
//!   JSON and keep it running until Ctrl-C
//! - `show-profile`: Show profile discovery information and the resolved
//!   profile

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    ShowProfile(ShowProfileConfig),
}

/// Flags of the `run` command, applied on top of the run profile.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub image: Option<String>,
    pub profile: Option<PathBuf>,
    pub ports: Vec<String>,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub name: Option<String>,
    pub timeout_secs: Option<u64>,
    pub interval_ms: Option<u64>,
    pub prefer_local: bool,
    pub privileged: bool,
    pub follow_logs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShowProfileConfig {
    pub profile: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "stevedore")]
#[command(author = "Stevedore Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Start a throwaway service container, wait until it is ready, print where it lives")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a container and keep it running until Ctrl-C
    Run {
        /// Image to run, overrides the profile
        image: Option<String>,
        /// Run profile path (TOML)
        #[arg(short = 'p', long = "profile")]
        profile: Option<PathBuf>,
        /// Named port as NAME=PORT, e.g. web=tcp/80 (can be used multiple times)
        #[arg(short = 'P', long = "port", value_name = "NAME=PORT")]
        ports: Vec<String>,
        /// Environment entry as KEY=VALUE (can be used multiple times)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Container name
        #[arg(long = "name")]
        name: Option<String>,
        /// Readiness deadline in seconds
        #[arg(short = 't', long = "timeout")]
        timeout_secs: Option<u64>,
        /// Pause between health checks in milliseconds
        #[arg(long = "interval")]
        interval_ms: Option<u64>,
        /// Reuse a local image instead of pulling
        #[arg(long = "prefer-local")]
        prefer_local: bool,
        /// Run the container in privileged mode
        #[arg(long = "privileged")]
        privileged: bool,
        /// Relay container output to stderr
        #[arg(short = 'f', long = "follow")]
        follow_logs: bool,
        /// Command override
        #[arg(last = true)]
        cmd: Vec<String>,
    },
    /// Show profile discovery information and the resolved profile
    ShowProfile {
        /// Run profile path (TOML)
        #[arg(short = 'p', long = "profile")]
        profile: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                image,
                profile,
                ports,
                env,
                name,
                timeout_secs,
                interval_ms,
                prefer_local,
                privileged,
                follow_logs,
                cmd,
            }) => Ok(ExecutionMode::Run(RunConfig {
                image: image.clone(),
                profile: profile.clone(),
                ports: ports.clone(),
                env: env.clone(),
                cmd: cmd.clone(),
                name: name.clone(),
                timeout_secs: *timeout_secs,
                interval_ms: *interval_ms,
                prefer_local: *prefer_local,
                privileged: *privileged,
                follow_logs: *follow_logs,
            })),
            Some(Commands::ShowProfile { profile }) => {
                Ok(ExecutionMode::ShowProfile(ShowProfileConfig {
                    profile: profile.clone(),
                }))
            }
            None => Err(
                "No command specified. Use 'stevedore --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
