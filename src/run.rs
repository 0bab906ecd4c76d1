//! The `run` command: one scenario from configuration to verdict.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{Agent, Orchestration, Verdict};
use crate::bridge::{BridgeOptions, ToolBridge};
use crate::config::{
    ConfigFile, DEFAULT_CONFIG_PATH, DEFAULT_PROFILE, RunOptions, RunOverrides,
    ensure_default_config, load_env,
};
use crate::error::RunError;
use crate::llm::ModelMessage;
use crate::provider::Provider;
use crate::report;
use crate::scenario::load_scenario;
use crate::tools::think_tool;
use crate::usage::UsageMeter;

pub const CUSTOM_AGENT_ENV: &str = "CUSTOM_AGENT";

#[derive(Clone, Debug, Default)]
pub struct RunCommand {
    /// Path or `http(s)` URL of the scenario.
    pub file: String,
    /// Explicit config file; the default path is created when missing.
    pub config_file: Option<PathBuf>,
    pub profile: Option<String>,
    pub overrides: RunOverrides,
    pub custom_agent: bool,
}

fn orchestration(custom_agent: bool, env_flag: Option<OsString>) -> Orchestration {
    if custom_agent || env_flag.is_some() {
        Orchestration::Custom
    } else {
        Orchestration::Managed
    }
}

fn resolve_options(config: &ConfigFile, command: &RunCommand) -> Result<RunOptions, RunError> {
    let profile_name = command.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let options = config
        .profile(profile_name)?
        .run_options
        .with_overrides(&command.overrides);
    options.validate()?;
    Ok(options)
}

/// Runs the scenario and returns its verdict.
///
/// Errors are setup failures that happen before the agent starts.
pub async fn run_scenario(command: RunCommand) -> Result<Verdict, RunError> {
    load_env();

    let config_path = match &command.config_file {
        Some(path) => path.clone(),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            ensure_default_config(&path)?;
            path
        }
    };
    let config = ConfigFile::load(&config_path)?;
    let options = resolve_options(&config, &command)?;
    let profile = config.profile(command.profile.as_deref().unwrap_or(DEFAULT_PROFILE))?;

    let (provider, model_name) = Provider::from_env()?;
    let model = provider.connect(&model_name, Some(options.temperature))?;
    info!(provider = provider.id(), model = %model_name, "model selected");

    let meter = Arc::new(UsageMeter::new(provider, &model_name).on_usage(report::log_usage));
    let scenario = load_scenario(&command.file).await?;

    let scratch_dir = tempfile::Builder::new()
        .prefix("aethr-")
        .tempdir()
        .map_err(RunError::ScratchDir)?;

    let bridge = ToolBridge::open(
        &profile.mcp_servers,
        &BridgeOptions {
            reasoning: options.reasoning,
            scratch_dir: scratch_dir.path().to_path_buf(),
        },
    )
    .await?;

    let mut tools = bridge.tools().to_vec();
    if options.think_tool {
        tools.push(think_tool());
    }

    let built = Agent::builder()
        .shared_model(model)
        .tools(tools)
        .max_iterations(options.recursion_limit)
        .orchestration(orchestration(
            command.custom_agent,
            std::env::var_os(CUSTOM_AGENT_ENV),
        ))
        .usage_meter(Arc::clone(&meter))
        .build();

    let outcome = match built {
        Ok(agent) => {
            let verdict = agent
                .run(vec![ModelMessage::User(scenario)], |text| {
                    let mut stdout = std::io::stdout().lock();
                    let _ = writeln!(stdout, "{text}");
                })
                .await;
            report::log_verdict(&verdict);
            Ok(verdict)
        }
        Err(err) => Err(RunError::Agent(err)),
    };

    report::log_total_usage(&meter.totals());

    if let Err(err) = bridge.close().await {
        warn!(error = %err, "failed to close tool servers");
    }
    if let Err(err) = scratch_dir.close() {
        warn!(error = %err, "failed to remove scratch directory");
    }

    outcome
}
