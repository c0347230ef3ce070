//! Sandbox build configuration (YAML)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Arch, LD_SO_CACHE};

/// Errors raised while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Filter posture for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    /// Deny by default, allow what the rule file lists
    Whitelist,
    /// Allow by default, deny a fixed list of dangerous calls
    Blacklist,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Target architecture (native when omitted)
    #[serde(default)]
    pub arch: Option<Arch>,
    /// Dynamic linker cache to resolve libraries against
    #[serde(default = "default_ld_so_cache")]
    pub ld_so_cache: PathBuf,
    /// Seccomp profiles to build
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
    /// Library closure inputs
    #[serde(default)]
    pub libraries: LibraryConfig,
}

/// One seccomp profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile name, used for output file names
    pub name: String,
    /// Filter posture
    pub posture: Posture,
    /// Rule file (whitelist only). The built-in browser whitelist is used when omitted.
    #[serde(default)]
    pub rules: Option<PathBuf>,
}

/// Inputs to the library resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Binaries that will run inside the sandbox
    #[serde(default)]
    pub binaries: Vec<PathBuf>,
    /// Libraries loaded at runtime without being imported (dlopen)
    #[serde(default)]
    pub extra_libs: Vec<String>,
    /// Library search path seen inside the sandbox (`:`-separated)
    #[serde(default)]
    pub search_path: String,
}

fn default_ld_so_cache() -> PathBuf {
    PathBuf::from(LD_SO_CACHE)
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            arch: None,
            ld_so_cache: default_ld_so_cache(),
            profiles: Vec::new(),
            libraries: LibraryConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                return Err(ConfigError::Invalid("profile with empty name".into()));
            }
            // Names become file names under the output directory
            if profile.name.contains('/') || profile.name == "." || profile.name == ".." {
                return Err(ConfigError::Invalid(format!(
                    "profile name '{}' is not a plain file name",
                    profile.name
                )));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
            if profile.posture == Posture::Blacklist && profile.rules.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "profile '{}': blacklist profiles do not take a rule file",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    /// Configured architecture, or the native one.
    pub fn target_arch(&self) -> Result<Arch, crate::UnsupportedArch> {
        match self.arch {
            Some(arch) => Ok(arch),
            None => Arch::native(),
        }
    }
}
