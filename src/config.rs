//! Profile configuration loaded from `aethr.toml`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "aethr.toml";
pub const DEFAULT_PROFILE: &str = "default";

const DEFAULT_CONFIG: &str = include_str!("../aethr.default.toml");

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Profile {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub run_options: RunOptions,
}

/// How to launch one stdio tool server.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Server tool names left out of the catalog.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunOptions {
    pub recursion_limit: u32,
    pub temperature: f32,
    pub think_tool: bool,
    pub reasoning: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            recursion_limit: 50,
            temperature: 0.7,
            think_tool: false,
            reasoning: false,
        }
    }
}

/// Command-line values that take precedence over the profile's run options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunOverrides {
    pub recursion_limit: Option<u32>,
    pub temperature: Option<f32>,
    pub think_tool: Option<bool>,
    pub reasoning: Option<bool>,
}

impl RunOptions {
    pub fn with_overrides(self, overrides: &RunOverrides) -> Self {
        Self {
            recursion_limit: overrides.recursion_limit.unwrap_or(self.recursion_limit),
            temperature: overrides.temperature.unwrap_or(self.temperature),
            think_tool: overrides.think_tool.unwrap_or(self.think_tool),
            reasoning: overrides.reasoning.unwrap_or(self.reasoning),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recursion_limit == 0 {
            return Err(ConfigError::Invalid(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "reading configuration file");

        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        for (name, profile) in &config.profiles {
            profile.run_options.validate().map_err(|err| match err {
                ConfigError::Invalid(message) => {
                    ConfigError::Invalid(format!("profile '{name}': {message}"))
                }
                other => other,
            })?;
            for (server, server_config) in &profile.mcp_servers {
                if server_config.command.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "profile '{name}': server '{server}' has an empty command"
                    )));
                }
            }
        }

        Ok(config)
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))
    }
}

/// Writes the default configuration to `path` unless a file already exists there.
///
/// Returns whether a file was created.
pub fn ensure_default_config(path: &Path) -> Result<bool, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "config file already exists, skipping creation");
            return Ok(false);
        }
        Err(err) => return Err(io_error(err)),
    };

    file.write_all(DEFAULT_CONFIG.as_bytes()).map_err(io_error)?;
    info!(path = %path.display(), "default config file created");
    Ok(true)
}

/// Loads `.env` from the working directory when present.
pub fn load_env() {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            debug!(error = %err, "failed to load .env file");
        }
    }
}
