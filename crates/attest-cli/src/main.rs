use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use attest_core::{render_gate_result, render_prd_report, Prd, ReportFormat};
use attest_runtime::definition::DefinitionGate;
use attest_runtime::{
    ContainerAgentRuntime, FileGateLoader, Gate, GateDefinition, GateRegistry, GateRunner,
    GitDiffSource, PrdRunner, RunnerConfig, RuntimeConfig,
};

#[derive(Parser, Debug)]
#[command(name = "attest", version, about = "Evidence-based verification of running systems")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every story of a PRD in dependency order
    Run {
        /// PRD file (YAML or JSON)
        prd: PathBuf,

        /// Write the JSON report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Check each story's diff against its scope first
        #[arg(long)]
        check_scope: bool,

        /// Base reference for scope diffs
        #[arg(long, default_value = "HEAD")]
        base_ref: String,

        /// Runtime configuration (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Per-story deadline, e.g. "90s" or "5m"
        #[arg(long)]
        story_timeout: Option<humantime::Duration>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check a PRD without running anything and print its levels
    Validate {
        prd: PathBuf,
    },

    /// Run a single gate file
    Gate {
        file: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "attest=debug" } else { "attest=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading runtime config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn gate_runner(config: RuntimeConfig) -> GateRunner {
    let agent = ContainerAgentRuntime::from_config(&config.agent);
    GateRunner::new(Arc::new(config)).with_agent_runtime(Arc::new(agent))
}

fn load_prd(path: &Path) -> anyhow::Result<Prd> {
    Prd::from_file(path).with_context(|| format!("loading PRD {}", path.display()))
}

/// Gate files resolve relative to the PRD's directory.
fn registry_for(prd_path: &Path, runner: GateRunner) -> GateRegistry {
    let base = prd_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    debug!(base = %base.display(), "Resolving gate files");
    GateRegistry::new().with_loader(Arc::new(FileGateLoader::new(base, runner)))
}

fn format(json: bool) -> ReportFormat {
    if json {
        ReportFormat::Json
    } else {
        ReportFormat::Human
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.cmd {
        Command::Run {
            prd,
            report,
            check_scope,
            base_ref,
            config,
            story_timeout,
            json,
        } => {
            let runtime = load_config(config.as_deref())?;
            let story_timeout = story_timeout.map(Into::into).or(runtime.story_timeout);
            let registry = registry_for(&prd, gate_runner(runtime));
            let document = load_prd(&prd)?;

            let mut runner = PrdRunner::new(registry).with_config(RunnerConfig {
                check_scope,
                base_ref,
                report_path: report,
                story_timeout,
            });
            if check_scope {
                let repo = std::env::current_dir().context("resolving repository root")?;
                runner = runner.with_diff_source(Arc::new(GitDiffSource::new(repo)));
            }

            let outcome = runner.run(&document).await?;
            print!("{}", render_prd_report(&outcome, format(json)));
            Ok(outcome.success)
        }
        Command::Validate { prd } => {
            let document = load_prd(&prd)?;
            let graph = document.validate()?;
            for (index, level) in graph.levels().iter().enumerate() {
                println!("level {}: {}", index, level.join(", "));
            }
            info!(stories = graph.len(), "PRD is valid");
            Ok(true)
        }
        Command::Gate { file, config, json } => {
            let definition = GateDefinition::from_file(&file)
                .with_context(|| format!("loading gate {}", file.display()))?;
            let name = definition.name.clone();
            let runner = gate_runner(load_config(config.as_deref())?);
            let gate = DefinitionGate::new(definition, runner);
            let result = gate.run().await;
            print!("{}", render_gate_result(&name, &result, format(json)));
            Ok(result.is_success())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
