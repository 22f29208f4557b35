//! fuzzstate CLI entrypoint.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fuzzstate::{
    Case, Config, HostUserService, HumanDuration, RunSession, ScriptedUserService, ServiceBackend, StatefulBridge,
    StatsReport, UserService,
};

#[derive(Debug, Parser)]
#[command(name = "fuzzstate")]
#[command(about = "entity-state tracking and request shaping for stateful API fuzzing")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "fuzzstate.toml")]
    config: PathBuf,

    /// Log level (RUST_LOG takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Shape, dispatch and reconcile generated cases read as JSON lines
    Drive {
        /// File with one case per line, or "-" for stdin.
        #[arg(long, default_value = "-")]
        cases: String,

        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        backend: Option<ServiceBackend>,

        /// Timeout for internal calls, e.g. "5s".
        #[arg(long)]
        timeout: Option<HumanDuration>,

        /// Seed for reproducible generated names.
        #[arg(long)]
        seed: Option<u64>,

        /// Write the case trace (JSON) here when the run finishes.
        #[arg(long)]
        trace_out: Option<PathBuf>,

        /// Delete entities this run created itself before exiting.
        #[arg(long)]
        teardown_cleanup: bool,
    },

    /// Print resolved config + environment info
    Env,

    /// Print version and build info
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let config = Config::load_optional(&cli.config).with_env_overrides();

    match run_command(&cli, config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
}

fn run_command(cli: &Cli, mut config: Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Drive {
            cases,
            base_url,
            backend,
            timeout,
            seed,
            trace_out,
            teardown_cleanup,
        } => {
            if let Some(url) = base_url {
                config.base_url = url.clone();
            }
            if let Some(backend) = backend {
                config.backend = *backend;
            }
            if let Some(timeout) = timeout {
                config.request_timeout = *timeout;
            }
            if seed.is_some() {
                config.seed = *seed;
            }
            if trace_out.is_some() {
                config.trace_out = trace_out.clone();
            }
            config.teardown_cleanup |= *teardown_cleanup;

            let reader = open_cases(cases)?;
            let interrupted = install_interrupt_flag();
            let report = match config.backend {
                ServiceBackend::Host => {
                    let service = HostUserService::new(config.base_url_trimmed(), config.timeout());
                    drive(service, &config, reader, cases, &interrupted)
                }
                ServiceBackend::Scripted => drive(ScriptedUserService::new(), &config, reader, cases, &interrupted),
            };
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                print!("{}", report.pretty());
            }
            if interrupted.load(Ordering::SeqCst) {
                return Ok(ExitCode::from(130));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Env => {
            print_json_or_text(cli, &fuzzstate::env_info(&config))?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Version => {
            print_json_or_text(cli, &fuzzstate::version_info())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_cases(source: &str) -> anyhow::Result<Box<dyn BufRead>> {
    if source == "-" {
        return Ok(Box::new(std::io::BufReader::new(std::io::stdin())));
    }
    let file = std::fs::File::open(source).with_context(|| format!("failed to open cases file {source}"))?;
    Ok(Box::new(std::io::BufReader::new(file)))
}

/// First SIGINT/SIGTERM stops the run after the current case; a second one exits at once.
fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    let installed = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        tracing::warn!("interrupt received; stopping after the current case");
    });
    if let Err(err) = installed {
        tracing::warn!("failed to install interrupt handler: {err}");
    }
    flag
}

/// Cases are shaped as they arrive; the statistics report is produced however the loop ends.
fn drive<S: UserService>(
    service: S,
    config: &Config,
    reader: Box<dyn BufRead>,
    source: &str,
    interrupted: &AtomicBool,
) -> StatsReport {
    let mut session = RunSession::new(StatefulBridge::new(service, config), config).with_report_log(false);
    for (idx, line) in reader.lines().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            tracing::warn!("run interrupted before line {}", idx + 1);
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("failed to read cases from {source}: {err}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut case = match serde_json::from_str::<Case>(line) {
            Ok(case) => case,
            Err(err) => {
                tracing::warn!("skipping malformed case on line {}: {err}", idx + 1);
                continue;
            }
        };
        if let Err(err) = session.run_case(&mut case) {
            tracing::warn!("dispatch failed for {} {}: {err}", case.method(), case.path());
        }
    }
    session.finish()
}

fn print_json_or_text<T: serde::Serialize>(cli: &Cli, value: &T) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}
