use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{0}' was requested but is not available.")]
    NotFound(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Invoke(#[from] ToolInvokeError),
}

/// Transport-level failures of a single tool server.
#[derive(Debug, Error)]
pub enum ToolInvokeError {
    #[error("failed to spawn tool server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("tool server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tool server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("tool server '{server}' terminated unexpectedly")]
    Terminated { server: String },
    #[error("tool server '{server}' is closed")]
    Closed { server: String },
}

#[derive(Debug)]
pub struct CloseFailure {
    pub server: String,
    pub error: ToolInvokeError,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("tool server '{server}' failed to start: {source}")]
    Startup {
        server: String,
        #[source]
        source: ToolInvokeError,
    },
    #[error("tool server '{server}' published an invalid schema for '{tool}': {source}")]
    Catalog {
        server: String,
        tool: String,
        #[source]
        source: SchemaError,
    },
    #[error("failed to close tool servers: {}", CloseFailures(.0))]
    Close(Vec<CloseFailure>),
}

struct CloseFailures<'a>(&'a [CloseFailure]);

impl fmt::Display for CloseFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.server, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
    #[error("no model client is available for provider '{0}'")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("max iterations reached ({max_iterations})")]
    MaxIterationsReached { max_iterations: u32 },
    #[error("structured output failed validation: {0}")]
    InvalidStructuredOutput(String),
    #[error("agent configuration error: {0}")]
    Config(String),
}

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("profile '{0}' is not defined in the configuration")]
    ProfileNotFound(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("test file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("failed to read test file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load test file from URL {url}: {message}")]
    Fetch { url: String, message: String },
}

/// Failures that abort a run before a verdict can be produced.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("failed to create scratch directory: {0}")]
    ScratchDir(#[source] std::io::Error),
}
