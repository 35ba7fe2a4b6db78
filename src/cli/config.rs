//! Run profile discovery and loading
//!
//! A run profile describes one container in TOML. It is looked up in this
//! order unless a path is given explicitly:
//! 1. Current directory: ./stevedore.toml or ./.stevedore/profile.toml
//! 2. User profile: ~/.stevedore/profile.toml
//! 3. Built-in defaults (no image; one must come from the command line)
//!
//! Command line flags are applied on top of the loaded profile.

use crate::cli::args::RunConfig;
use crate::container::{
    ContainerOption, DEFAULT_PORT_NAME, NamedPorts, Port, RegistryCredential,
};
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const REDACTED: &str = "<redacted>";

/// Errors raised while loading or applying a run profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Failed to read profile {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse profile {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write profile: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// Host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountProfile {
    pub source: String,
    pub target: String,
}

/// One container, described in TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunProfile {
    pub image: Option<String>,
    pub name: Option<String>,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub health_check_interval_ms: Option<u64>,
    pub use_local_images_first: bool,
    pub privileged: bool,
    /// Logical name to `tcp/80`, `80/tcp` or `80`
    pub ports: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<MountProfile>,
    pub registry: Option<RegistryCredential>,
}

impl RunProfile {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy of this profile that is safe to print: registry password and
    /// identity token are masked.
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());
        let mut profile = self.clone();
        if let Some(registry) = profile.registry.as_mut() {
            registry.password = mask(&registry.password);
            registry.identity_token = mask(&registry.identity_token);
        }
        profile
    }

    /// Apply command line flags on top of this profile.
    ///
    /// Scalars given on the command line replace the profile's; ports and
    /// environment entries are added; a non-empty command replaces the
    /// profile's command.
    pub fn apply_overrides(&mut self, overrides: &RunConfig) -> Result<(), ProfileError> {
        if let Some(image) = &overrides.image {
            self.image = Some(image.clone());
        }
        if let Some(name) = &overrides.name {
            self.name = Some(name.clone());
        }

        for entry in &overrides.ports {
            let (name, port) = match entry.split_once('=') {
                Some((name, port)) => (name.trim().to_string(), port.trim().to_string()),
                None => (DEFAULT_PORT_NAME.to_string(), entry.trim().to_string()),
            };
            if name.is_empty() {
                return Err(ProfileError::Invalid(format!(
                    "Port '{}' has an empty name",
                    entry
                )));
            }
            self.ports.insert(name, port);
        }

        self.env.extend(overrides.env.iter().cloned());

        if !overrides.cmd.is_empty() {
            self.cmd = overrides.cmd.clone();
        }
        if overrides.timeout_secs.is_some() {
            self.timeout_secs = overrides.timeout_secs;
        }
        if overrides.interval_ms.is_some() {
            self.health_check_interval_ms = overrides.interval_ms;
        }
        self.use_local_images_first |= overrides.prefer_local;
        self.privileged |= overrides.privileged;

        Ok(())
    }

    /// Image, named ports and start options described by this profile.
    pub fn to_start_request(
        &self,
    ) -> Result<(String, NamedPorts, Vec<ContainerOption>), ProfileError> {
        let image = self
            .image
            .clone()
            .ok_or_else(|| ProfileError::Invalid("No image given".to_string()))?;

        let mut ports = NamedPorts::new();
        for (name, spec) in &self.ports {
            let port: Port = spec.parse().map_err(|e| {
                ProfileError::Invalid(format!("Port '{}' is invalid: {}", name, e))
            })?;
            ports.insert(name.clone(), port);
        }

        let mut options: Vec<ContainerOption> = self
            .env
            .iter()
            .map(|entry| ContainerOption::Env(entry.clone()))
            .collect();

        if !self.cmd.is_empty() {
            options.push(ContainerOption::Command(self.cmd.clone()));
        }
        if let Some(name) = &self.name {
            options.push(ContainerOption::Name(name.clone()));
        }
        if let Some(secs) = self.timeout_secs {
            options.push(ContainerOption::Timeout(Duration::from_secs(secs)));
        }
        if let Some(ms) = self.health_check_interval_ms {
            options.push(ContainerOption::HealthCheckInterval(Duration::from_millis(ms)));
        }
        if self.use_local_images_first {
            options.push(ContainerOption::UseLocalImagesFirst(true));
        }
        if self.privileged {
            options.push(ContainerOption::Privileged(true));
        }
        for (key, value) in &self.labels {
            options.push(ContainerOption::Label(key.clone(), value.clone()));
        }
        for mount in &self.mounts {
            options.push(ContainerOption::HostMount {
                source: mount.source.clone(),
                target: mount.target.clone(),
            });
        }
        if let Some(credential) = &self.registry {
            options.push(ContainerOption::RegistryAuth(credential.clone()));
        }

        Ok((image, ports, options))
    }
}

/// Profile discovery system
pub struct ProfileDiscovery;

impl ProfileDiscovery {
    /// Load `explicit` if given, otherwise the first discovered profile, or
    /// the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<RunProfile, ProfileError> {
        if let Some(path) = explicit {
            info!("Loading run profile from: {:?}", path);
            return RunProfile::from_toml_file(path);
        }

        if let Some(path) = Self::find_profile_file() {
            info!("Loading run profile from: {:?}", path);
            return RunProfile::from_toml_file(path);
        }

        info!("No run profile found, using defaults");
        Ok(RunProfile::default())
    }

    /// Find a profile file using the discovery hierarchy
    pub fn find_profile_file() -> Option<PathBuf> {
        for candidate in Self::get_profile_candidates() {
            debug!("Checking for profile: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found profile: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No profile found in discovery hierarchy");
        None
    }

    /// Profile candidates in priority order
    fn get_profile_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_profile_file_path(&current_dir));
            candidates.push(env::local_profile_dir_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_profile_file_path(&home_dir));
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show profile discovery information for debugging
    pub fn show_discovery_info() {
        println!("Profile Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_profile_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_profile_file() {
            println!("Active profile: {:?}", found);
        } else {
            println!("Active profile: Built-in defaults");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROFILE: &str = r#"
image = "docker.io/orlangure/gnomock-test-image"
env = ["GREETING=hello"]
timeout_secs = 30
use_local_images_first = true

[ports]
web80 = "tcp/80"
web8080 = "8080"

[labels]
team = "infra"

[[mounts]]
source = "/tmp/fixtures"
target = "/fixtures"
"#;

    #[test]
    fn test_profile_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profile.toml");
        fs::write(&path, PROFILE).unwrap();

        let profile = RunProfile::from_toml_file(&path).unwrap();
        assert_eq!(
            profile.image.as_deref(),
            Some("docker.io/orlangure/gnomock-test-image")
        );
        assert_eq!(profile.ports.len(), 2);
        assert_eq!(profile.mounts.len(), 1);
        assert!(profile.use_local_images_first);

        let saved = temp_dir.path().join("saved.toml");
        profile.to_toml_file(&saved).unwrap();
        assert_eq!(RunProfile::from_toml_file(&saved).unwrap(), profile);
    }

    #[test]
    fn test_start_request_from_profile() {
        let profile: RunProfile = toml::from_str(PROFILE).unwrap();
        let (image, ports, options) = profile.to_start_request().unwrap();

        assert_eq!(image, "docker.io/orlangure/gnomock-test-image");
        assert_eq!(ports.get("web80"), Some(Port::tcp(80)));
        assert_eq!(ports.get("web8080"), Some(Port::tcp(8080)));

        // Env, timeout, local preference, one label, one mount.
        assert_eq!(options.len(), 5);
        assert!(
            options
                .iter()
                .any(|o| matches!(o, ContainerOption::Timeout(t) if *t == Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_overrides_apply_on_top() {
        let mut profile: RunProfile = toml::from_str(PROFILE).unwrap();
        let overrides = RunConfig {
            image: Some("nginx:alpine".to_string()),
            ports: vec!["admin=tcp/8081".to_string(), "9000".to_string()],
            env: vec!["EXTRA=1".to_string()],
            cmd: vec!["serve".to_string()],
            timeout_secs: Some(5),
            ..Default::default()
        };

        profile.apply_overrides(&overrides).unwrap();

        assert_eq!(profile.image.as_deref(), Some("nginx:alpine"));
        assert_eq!(profile.ports.len(), 4);
        assert_eq!(profile.ports.get(DEFAULT_PORT_NAME).map(String::as_str), Some("9000"));
        assert_eq!(profile.env, vec!["GREETING=hello", "EXTRA=1"]);
        assert_eq!(profile.cmd, vec!["serve"]);
        assert_eq!(profile.timeout_secs, Some(5));
        assert!(profile.use_local_images_first);
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(RunProfile::default().to_start_request().is_err());

        let profile = RunProfile {
            image: Some("alpine".to_string()),
            ports: BTreeMap::from([("web".to_string(), "sctp/80".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            profile.to_start_request(),
            Err(ProfileError::Invalid(_))
        ));

        let mut profile = RunProfile::default();
        let overrides = RunConfig {
            ports: vec!["=80".to_string()],
            ..Default::default()
        };
        assert!(profile.apply_overrides(&overrides).is_err());

        let temp_dir = TempDir::new().unwrap();
        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "image = [").unwrap();
        assert!(matches!(
            RunProfile::from_toml_file(&broken),
            Err(ProfileError::Parse { .. })
        ));
    }

    #[test]
    fn test_explicit_profile_wins() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("explicit.toml");
        fs::write(&path, "image = \"redis\"\n[ports]\ndefault = \"6379\"\n").unwrap();

        let profile = ProfileDiscovery::load(Some(path.as_path())).unwrap();
        assert_eq!(profile.image.as_deref(), Some("redis"));
    }

    #[test]
    fn test_redacted_profile_hides_registry_secrets() {
        let profile = RunProfile {
            image: Some("ghcr.io/acme/private:1".to_string()),
            registry: Some(RegistryCredential {
                username: Some("deploy".to_string()),
                password: Some("hunter2".to_string()),
                server_address: Some("ghcr.io".to_string()),
                identity_token: Some("eyJhbGciOi".to_string()),
            }),
            ..Default::default()
        };

        let printed = profile.redacted().to_toml_string().unwrap();
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("eyJhbGciOi"));
        assert!(printed.contains("deploy"));
        assert!(printed.contains(REDACTED));

        // Saving keeps the real credential
        assert!(profile.to_toml_string().unwrap().contains("hunter2"));
        assert_eq!(
            profile.registry.as_ref().and_then(|r| r.password.as_deref()),
            Some("hunter2")
        );
    }

    #[test]
    fn test_profile_candidates() {
        let candidates = ProfileDiscovery::get_profile_candidates();
        assert!(!candidates.is_empty());
        assert_eq!(
            candidates[0].file_name().unwrap(),
            env::LOCAL_PROFILE_FILE_NAME
        );
    }
}
