// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! mcprobe CLI.
//!
//! Spawns an MCP server, runs the scenario suite against it over stdio,
//! prints a report to stdout, and exits non-zero if any step failed.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mcprobe::cli::{ColorConfig, terminal_width, truncate};
use mcprobe::config::Config;
use mcprobe::process::{ServerCommand, StderrMode};
use mcprobe::scenario::{self, Scenario, ScenarioContext, StepKind};

/// Command-line arguments for mcprobe.
#[derive(Parser, Debug)]
#[command(name = "mcprobe")]
#[command(about = "Drive an MCP server over stdio and check its responses")]
#[command(version = env!("MCPROBE_VERSION"))]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

/// Subcommands supported by mcprobe.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scenarios against a server (default if no subcommand given).
    Run(RunArgs),

    /// Print the planned scenarios and steps without spawning anything.
    List(RunArgs),
}

/// Options shared by `run` and `list`.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Server executable to probe.
    server: Option<String>,

    /// Extra arguments passed to the server after `--`.
    #[arg(last = true)]
    server_args: Vec<String>,

    /// Repository path handed to the server as `--repo <PATH>`.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Working directory for the server.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-step deadline in seconds. Overrides config file if set.
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds the server gets to exit before it is killed.
    #[arg(long)]
    grace: Option<u64>,

    /// Write the report as JSON to this file.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long)]
    nocolor: bool,

    /// Add the extended scenarios (context window, ping, unknown method).
    #[arg(long)]
    extended: bool,

    /// Skip the built-in scenarios and run only those from the config file.
    #[arg(long)]
    no_builtin: bool,

    /// Pass the server's stderr through instead of discarding it.
    #[arg(long)]
    show_server_stderr: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (list, args) = match cli.command {
        Some(Command::List(args)) => (true, args),
        Some(Command::Run(args)) => (false, args),
        None => (false, cli.run),
    };

    if let Err(e) = init_tracing(args.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let outcome = if list {
        run_list(&args).map(|()| true)
    } else {
        run_probe(&args).await
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let directive = if verbose { "mcprobe=debug" } else { "mcprobe=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}

/// Loads configuration and applies CLI overrides.
fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;

    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(grace) = args.grace {
        config.grace_period_secs = grace;
    }
    if args.no_builtin {
        config.builtin = false;
    }
    if args.show_server_stderr {
        config.server_stderr = StderrMode::Inherit;
    }
    Ok(config)
}

/// Built-in scenarios (unless disabled) followed by the config file's.
fn plan(args: &RunArgs, config: &Config) -> Result<Vec<Scenario>> {
    let mut scenarios = if config.builtin {
        scenario::suite(&config.builtin_options(), args.extended)
    } else {
        Vec::new()
    };
    scenarios.extend(config.user_scenarios()?);

    if scenarios.is_empty() {
        bail!("No scenarios to run: built-ins are disabled and the config declares none");
    }
    Ok(scenarios)
}

async fn run_probe(args: &RunArgs) -> Result<bool> {
    let server = args
        .server
        .as_deref()
        .ok_or_else(|| anyhow!("No server given. Usage: mcprobe <SERVER> [-- ARGS...]"))?;

    let config = load_config(args)?;
    let scenarios = plan(args, &config)?;

    let mut command = ServerCommand::new(server)
        .args(["--repo".to_string(), args.repo.to_string_lossy().into_owned()])
        .args(args.server_args.iter().cloned());
    command.stderr = config.server_stderr;
    if let Some(cwd) = &args.cwd {
        command = command.cwd(cwd);
    }

    info!("Probing {}", command.display());
    debug!("Configuration: {:?}", config);

    let report = scenario::run(&command, &scenarios, &config.run_options())
        .await
        .with_context(|| format!("Cannot probe '{server}'"))?;

    let colors = ColorConfig::new(args.nocolor);
    print!("{}", report.render(&colors));

    if let Some(path) = &args.json {
        report.write_json(path)?;
        info!("Wrote JSON report to {}", path.display());
    }

    Ok(report.success())
}

fn run_list(args: &RunArgs) -> Result<()> {
    let config = load_config(args)?;
    let scenarios = plan(args, &config)?;
    let colors = ColorConfig::new(args.nocolor);
    let width = terminal_width();
    let context = ScenarioContext::default();

    for scenario in &scenarios {
        println!("{}", colors.cyan(&scenario.name));
        for step in &scenario.steps {
            let params = match (step.params)(&context) {
                Ok(Some(params)) => params.to_string(),
                Ok(None) => String::new(),
                Err(_) => "<built from earlier results>".to_string(),
            };
            let timing = match step.kind {
                StepKind::Request => format!("{}s", step.timeout.as_secs()),
                StepKind::Notification => "notification".to_string(),
            };
            let head = format!("  {:<18} {:<28} {:>12}", step.name, step.method, timing);
            let room = width.saturating_sub(head.chars().count() + 1);
            println!(
                "  {:<18} {} {:>12} {}",
                step.name,
                colors.blue(&format!("{:<28}", step.method)),
                timing,
                colors.dim(&truncate(&params, room))
            );
        }
    }
    Ok(())
}
