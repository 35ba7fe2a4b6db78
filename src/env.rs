//! Environment constants and defaults.
//!
//! This module centralizes the defaults, label names and environment variable
//! names used throughout the crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding per-project and per-user settings
pub const STEVEDORE_DIR_NAME: &str = ".stevedore";

/// Run profile file name inside [`STEVEDORE_DIR_NAME`]
pub const PROFILE_FILE_NAME: &str = "profile.toml";

/// Run profile file name looked up in the current directory
pub const LOCAL_PROFILE_FILE_NAME: &str = "stevedore.toml";

/// Deadline for the readiness wait when no timeout option is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between failed health checks when no interval option is given
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Label attached to every container this crate creates
pub const MANAGED_LABEL: &str = "stevedore.managed";

/// Runtime-related defaults
pub mod runtime {
    use std::time::Duration;

    /// Prefix of generated container names
    pub const DEFAULT_NAME_PREFIX: &str = "stevedore";

    /// Grace period given to a container before it is killed on stop
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

    /// Upper bound on a whole teardown (stop, log drain, remove)
    pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

    /// Upper bound on waiting for the log relay to reach end of stream
    pub const DEFAULT_LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Inspections before a port without host binding is reported
    pub const DEFAULT_PORT_WAIT_ATTEMPTS: u32 = 20;

    /// Pause between port inspections
    pub const DEFAULT_PORT_WAIT_INTERVAL: Duration = Duration::from_millis(100);

    /// Host used for published ports of a local daemon
    pub const LOCALHOST: &str = "127.0.0.1";

    /// Variable pointing at a remote Docker daemon
    pub const DOCKER_HOST_VAR: &str = "DOCKER_HOST";
}

/// Test-related constants
pub mod test {
    /// Variable that disables Docker-backed tests when set to `1` or `true`
    pub const SKIP_CONTAINER_TESTS_VAR: &str = "SKIP_CONTAINER_TESTS";
}

/// Logging-related constants
pub mod logging {
    /// Filter used by the binary when `RUST_LOG` is unset
    pub const DEFAULT_FILTER: &str = "stevedore=info";
}

/// `./stevedore.toml`
pub fn local_profile_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_PROFILE_FILE_NAME)
}

/// `./.stevedore/profile.toml`
pub fn local_profile_dir_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(STEVEDORE_DIR_NAME).join(PROFILE_FILE_NAME)
}

/// `~/.stevedore/profile.toml`
pub fn user_profile_file_path(home_dir: &Path) -> PathBuf {
    home_dir.join(STEVEDORE_DIR_NAME).join(PROFILE_FILE_NAME)
}
