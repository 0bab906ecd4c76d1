//! Natural-language test scenario runner.
//!
//! - `Agent` drives a `ChatModel` through tool rounds to a PASS/FAIL `Verdict`
//! - `ToolBridge` exposes stdio MCP tool servers as `ToolSpec`s
//! - `UsageMeter` normalizes per-response token usage and prices it per provider
//! - `run::run_scenario` wires configuration, provider, tools and agent together

pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pricing;
pub mod provider;
pub mod report;
pub mod run;
pub mod scenario;
pub mod tools;
pub mod usage;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentEvent, Orchestration, Verdict, VerdictResult,
};
pub use bridge::{BridgeOptions, ToolBridge, ToolTransport};
pub use error::{
    AgentError, BridgeError, ConfigError, ProviderError, RunError, ScenarioError, SchemaError,
    ToolError, ToolInvokeError,
};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, ModelCompletion, ModelMessage, ModelToolCall,
    ModelToolChoice, ModelToolDefinition, ModelUsage,
};
pub use provider::Provider;
pub use tools::ToolSpec;
pub use usage::{Usage, UsageMeter};
