use std::path::{Path, PathBuf};
use std::process::ExitCode;

use aethr::config::RunOverrides;
use aethr::logging::{self, DEFAULT_LOG_DIR};
use aethr::run::{RunCommand, run_scenario};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error};

const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "aethr",
    version,
    about = "Run natural-language test scenarios with an LLM agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a test scenario and exit with its verdict
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario file path or http(s) URL
    file: String,
    #[arg(short = 'c', long)]
    config_file: Option<PathBuf>,
    #[arg(short, long)]
    profile: Option<String>,
    #[arg(short, long)]
    recursion_limit: Option<u32>,
    #[arg(long)]
    temperature: Option<f32>,
    /// Offer the local think_tool to the model
    #[arg(long)]
    think_tool: bool,
    /// Ask the model for a reasoning argument on every tool call
    #[arg(long)]
    reasoning: bool,
    /// Drive the rounds with the explicit loop instead of the event stream
    #[arg(long)]
    custom_agent: bool,
}

impl From<RunArgs> for RunCommand {
    fn from(args: RunArgs) -> Self {
        RunCommand {
            file: args.file,
            config_file: args.config_file,
            profile: args.profile,
            overrides: RunOverrides {
                recursion_limit: args.recursion_limit,
                temperature: args.temperature,
                think_tool: args.think_tool.then_some(true),
                reasoning: args.reasoning.then_some(true),
            },
            custom_agent: args.custom_agent,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Path::new(DEFAULT_LOG_DIR));
    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        Command::Run(args) => match run_scenario(args.into()).await {
            Ok(verdict) => ExitCode::from(verdict.exit_code()),
            Err(err) => {
                error!("{err}");
                ExitCode::from(EXIT_FATAL)
            }
        },
    }
}
