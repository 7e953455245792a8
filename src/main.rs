//! Script Supervisor - run a script and report its pieces and outcome.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use script_supervisor::config::{ConfigLoader, ScriptConfig};
use script_supervisor::display;
use script_supervisor::supervisor::{ChannelDelegate, Outcome, ProcessSupervisor, SupervisorEvent};

#[derive(Parser)]
#[command(
    name = "script-supervisor",
    about = "Run a script and report its output as delimiter-bounded pieces",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script under supervision.
    Run {
        /// Executable to run. Falls back to the config file's `path`.
        path: Option<PathBuf>,
        /// Arguments passed to the executable.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Piece delimiter. Supports \n, \t and \\ escapes.
        #[arg(short, long)]
        delimiter: Option<String>,
        /// Config file to load instead of the default search paths.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
        /// Do not truncate long output.
        #[arg(long)]
        raw: bool,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Expand the escapes accepted by `--delimiter`.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn resolve_config(
    path: Option<PathBuf>,
    args: Vec<String>,
    delimiter: Option<String>,
    config: Option<PathBuf>,
) -> Result<ScriptConfig, script_supervisor::config::ConfigError> {
    let loader = config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut script = loader.load()?;

    if let Some(path) = path {
        script.path = path;
        script.args = args;
    } else if !args.is_empty() {
        script.args = args;
    }
    if let Some(delimiter) = delimiter {
        script.delimiter = unescape(&delimiter);
    }
    script.autostart = true;

    script.validate()?;
    Ok(script)
}

async fn run(config: ScriptConfig, json: bool, raw: bool) -> ExitCode {
    let (delegate, mut events) = ChannelDelegate::new();

    if !json {
        display::print_run_start(&config.path, &config.args);
    }

    let supervisor = match ProcessSupervisor::builder(config) {
        Ok(builder) => match builder.build(Arc::new(delegate)).await {
            Ok(supervisor) => supervisor,
            Err(e) => {
                display::print_error(&e.to_string());
                return ExitCode::from(2);
            }
        },
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::from(2);
        }
    };

    let mut outcome: Option<Outcome> = None;
    let mut interrupted = false;

    while outcome.is_none() {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                interrupted = true;
                tracing::info!("Interrupted, stopping script");
                if let Err(e) = supervisor.stop().await {
                    display::print_error(&e.to_string());
                }
            }
            event = events.next() => {
                let Some(event) = event else { break };
                if json {
                    display::print_json_event(&event);
                }
                match event {
                    SupervisorEvent::Piece { channel, text } => {
                        if !json {
                            display::print_piece(channel, &text, raw);
                        }
                    }
                    SupervisorEvent::Outcome { outcome: finished } => {
                        if !json {
                            display::print_outcome(&finished, raw);
                        }
                        outcome = Some(finished);
                    }
                }
            }
        }
    }

    match outcome {
        Some(Outcome::Success(_)) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            path,
            args,
            delimiter,
            config,
            json,
            raw,
        } => {
            let config = match resolve_config(path, args, delimiter, config) {
                Ok(config) => config,
                Err(e) => {
                    display::print_error(&e.to_string());
                    return ExitCode::from(2);
                }
            };
            tracing::info!(
                path = %config.path.display(),
                delimiter = ?config.delimiter,
                "Starting script supervisor"
            );
            run(config, json, raw).await
        }
    }
}
