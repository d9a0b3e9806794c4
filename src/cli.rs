//! # CLI Module / 命令行模块
//!
//! Argument parsing and dispatch for the `suite-scheduler` binary.
//!
//! `suite-scheduler` 可执行文件的参数解析和命令分发。

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::scheduler::config::Strategy;

pub mod commands {
    pub mod plan;
    pub mod run;
}

/// Run file used when `--config` is not given.
pub const DEFAULT_RUN_FILE: &str = "SuiteRun.toml";

/// Parsed command line.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub verbose: bool,
    pub command: Option<CliCommand>,
}

#[derive(Debug, Clone)]
pub enum CliCommand {
    Run(RunArgs),
    Plan(PlanArgs),
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub jobs: Option<usize>,
    pub strategy: Option<Strategy>,
    pub html: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PlanArgs {
    pub config: PathBuf,
    pub json: bool,
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to the TOML run file")
        .value_name("CONFIG")
        .default_value(DEFAULT_RUN_FILE)
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

pub fn build_cli() -> Command {
    Command::new("suite-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs hierarchical test suites with dependency-aware parallel scheduling")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging (overridden by RUST_LOG)")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about("Execute every test of a run file")
                .arg(config_arg())
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help("Number of tests executing at once")
                        .value_name("JOBS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .help("Execution strategy: 'plan' or 'walk'")
                        .value_name("STRATEGY")
                        .value_parser(clap::builder::ValueParser::new(str::parse::<Strategy>))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help("Write an HTML report to this path")
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Write a JSON report to this path")
                        .value_name("JSON")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the execution plan of a run file without running it")
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the plan as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn config_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_FILE))
}

pub fn parse_args() -> CliArgs {
    from_matches(&build_cli().get_matches())
}

pub fn from_matches(matches: &ArgMatches) -> CliArgs {
    let command = match matches.subcommand() {
        Some(("run", run_matches)) => Some(CliCommand::Run(RunArgs {
            config: config_path(run_matches),
            jobs: run_matches.get_one::<usize>("jobs").copied(),
            strategy: run_matches.get_one::<Strategy>("strategy").copied(),
            html: run_matches.get_one::<PathBuf>("html").cloned(),
            json: run_matches.get_one::<PathBuf>("json").cloned(),
        })),
        Some(("plan", plan_matches)) => Some(CliCommand::Plan(PlanArgs {
            config: config_path(plan_matches),
            json: plan_matches.get_flag("json"),
        })),
        _ => None,
    };
    CliArgs {
        verbose: matches.get_flag("verbose"),
        command,
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub async fn process_command(args: CliArgs) -> Result<()> {
    match args.command {
        Some(CliCommand::Run(run_args)) => commands::run::execute(run_args).await,
        Some(CliCommand::Plan(plan_args)) => commands::plan::execute(plan_args),
        None => {
            build_cli().print_help()?;
            println!();
            Ok(())
        }
    }
}
