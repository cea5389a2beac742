//! hook-dispatch
//!
//! Entry point invoked by the host once per lifecycle event.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use hook_dispatch::hooks::queue::BacklogObserver;
use hook_dispatch::hooks::{
    DispatchConfig, DispatchOutcome, Dispatcher, FailedEventRecord, StatePaths, TracingPlugin,
};
use hook_dispatch::platform_dirs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "HOOK_DISPATCH_LOG";

#[derive(Parser)]
#[command(name = "hook-dispatch", version)]
#[command(about = "Dispatch agent host lifecycle events to configured handlers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured client id
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Write logs to stderr instead of the log directory
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch one event read from stdin (default)
    Run,

    /// Inspect or manage the retry queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },

    /// Inspect or reset the persisted context
    Context {
        #[command(subcommand)]
        action: ContextCommand,
    },

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Print queued events
    Status,

    /// Redeliver queued events now
    Drain {
        /// Maximum records to redeliver
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Discard every queued event
    Clear,
}

#[derive(Subcommand)]
enum ContextCommand {
    /// Print the persisted context
    Show,

    /// Reset the persisted context
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// List enabled handlers and the events they receive
    Handlers,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        None | Some(Commands::Run) => run_hook(&cli),
        Some(ref command) => match manage(&cli, command) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("hook-dispatch: {:#}", e);
                1
            }
        },
    };

    // Handlers abandoned by the timeout may still hold blocking threads
    std::process::exit(code);
}

/// Dispatch stdin; never fails the host over our own problems
fn run_hook(cli: &Cli) -> i32 {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hook-dispatch: {:#}", e);
            return 0;
        }
    };
    let _guard = init_logging(&config, cli.log_stderr);

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Failed to start runtime: {}", e);
            return 0;
        }
    };

    let outcome = match build_dispatcher(&config) {
        Ok(dispatcher) => runtime.block_on(dispatcher.run_from_reader(tokio::io::stdin())),
        Err(e) => {
            warn!("Failed to set up dispatcher: {:#}", e);
            DispatchOutcome::neutral()
        }
    };
    runtime.shutdown_background();

    write_outcome(&outcome);
    outcome.exit_code
}

fn manage(cli: &Cli, command: &Commands) -> Result<()> {
    // A broken file must not prevent overwriting it
    if let Commands::Config {
        action: ConfigCommand::Init { force },
    } = command
    {
        return init_config(cli, *force);
    }

    let config = load_config(cli)?;
    let _guard = init_logging(&config, cli.log_stderr);

    match command {
        Commands::Run => bail!("run is not a management command"),
        Commands::Queue { action } => {
            let mut config = config;
            config.retry_queue.enabled = true;
            let dispatcher = build_dispatcher(&config)?;
            let queue = dispatcher
                .retry_queue()
                .ok_or_else(|| anyhow!("retry queue unavailable"))?;

            match action {
                QueueCommand::Status => {
                    let status = queue.status()?;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                QueueCommand::Drain { limit } => {
                    let runtime = runtime()?;
                    let limit = limit.unwrap_or(config.retry_queue.drain_limit);
                    let report = runtime.block_on(dispatcher.drain_queue(limit))?;
                    runtime.shutdown_background();
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                QueueCommand::Clear => {
                    let removed = queue.clear()?;
                    println!("Cleared {} queued event(s)", removed);
                }
            }
        }
        Commands::Context { action } => {
            let dispatcher = build_dispatcher(&config)?;
            let store = dispatcher
                .context_store()
                .ok_or_else(|| anyhow!("context store unavailable"))?;

            match action {
                ContextCommand::Show => match store.load()? {
                    Some(context) => println!("{}", serde_json::to_string_pretty(&context)?),
                    None => println!("No active context"),
                },
                ContextCommand::Clear => {
                    store.clear()?;
                    println!("Context cleared");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigCommand::Show => print!("{}", config.to_toml()?),
            ConfigCommand::Handlers => {
                let dispatcher = build_dispatcher(&config)?;
                for (name, kinds) in dispatcher.registry().list_handlers() {
                    let kinds: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
                    println!("{}: {}", name, kinds.join(", "));
                }
            }
            ConfigCommand::Init { force } => init_config(cli, *force)?,
        },
    }

    Ok(())
}

/// One event per process; a single-threaded runtime is enough
fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    let path = config_path(cli)?;
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    if let Some(parent) = path.parent() {
        platform_dirs::ensure_dir(parent)?;
    }
    std::fs::write(&path, DispatchConfig::default().to_toml()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => platform_dirs::config_file(),
    }
}

/// Explicit `--config` must exist; the default location is optional
fn load_config(cli: &Cli) -> Result<DispatchConfig> {
    let path = config_path(cli)?;

    let mut config = if cli.config.is_some() || path.exists() {
        read_config(&path)?
    } else {
        DispatchConfig::default()
    };

    if let Some(client_id) = &cli.client_id {
        config.client_id = client_id.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration {}: {}", path.display(), e))?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<DispatchConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    DispatchConfig::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
}

fn build_dispatcher(config: &DispatchConfig) -> Result<Dispatcher> {
    let state_dir = match &config.state_dir {
        Some(dir) => dir.clone(),
        None => platform_dirs::state_dir()?,
    };
    let paths = StatePaths::new(&state_dir, &config.client_id);

    let mut dispatcher =
        Dispatcher::from_config(config, &paths)?.with_backlog_observer(backlog_warning());
    if config.debug {
        dispatcher = dispatcher.with_plugin(Arc::new(TracingPlugin));
    }
    Ok(dispatcher)
}

fn backlog_warning() -> BacklogObserver {
    Arc::new(|size: usize, entries: &[FailedEventRecord]| {
        let oldest = entries.first().map(|r| r.first_failed_at.to_rfc3339());
        warn!(size, oldest = ?oldest, "Retrying queued events");
    })
}

/// Logs never go to stdout, which belongs to the host
fn init_logging(config: &DispatchConfig, to_stderr: bool) -> Option<WorkerGuard> {
    let default_level = if config.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    if to_stderr {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return None;
    }

    let dir = platform_dirs::logs_dir().ok()?;
    platform_dirs::ensure_dir(&dir).ok()?;

    let appender = tracing_appender::rolling::daily(dir, "hook-dispatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Some(guard)
}

fn write_outcome(outcome: &DispatchOutcome) {
    if let Some(stdout) = &outcome.stdout {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", stdout);
        let _ = out.flush();
    }
    if let Some(stderr) = &outcome.stderr {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", stderr);
        let _ = err.flush();
    }
}
