//! agent-focus: list, focus and clean up agent sessions.
//!
//! Every command builds a [`FocusEngine`] for "this window": the tmux session
//! the command runs in, if any. `watch` keeps the engine running so this
//! window answers focus requests broadcast by others.
//!
//! ## Subcommands
//!
//! - `list`: sessions in this workspace (or all), most recent first
//! - `refresh`: reload from disk and print counts
//! - `focus <id>`: focus here, or ask the owning window to
//! - `cleanup`: delete sessions whose process is gone
//! - `remove-all`: delete every session file
//! - `rename <id> <alias>` / `unalias <id>`: name a session's directory
//! - `watch`: run the event loop until interrupted

mod output;
mod tmux_host;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use focus_core::{
    FocusEngine, FocusError, FocusOutcome, Settings, StorageConfig, SysinfoInspector,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::tmux_host::{TmuxExecutor, TmuxHost};

#[derive(Parser)]
#[command(name = "agent-focus")]
#[command(about = "Track agent sessions and jump to their terminals")]
#[command(version)]
struct Cli {
    /// State directory (default: ~/.agent-focus)
    #[arg(long, global = true, env = "AGENT_FOCUS_HOME")]
    state_dir: Option<PathBuf>,

    /// Identity of this window (default: tmux:<session id>)
    #[arg(long, global = true, env = "AGENT_FOCUS_WINDOW_ID")]
    window_id: Option<String>,

    /// Workspace root of this window; repeatable (default: current directory)
    #[arg(long = "workspace", global = true, value_name = "PATH")]
    workspaces: Vec<String>,

    /// tmux binary
    #[arg(long, global = true, default_value = "tmux")]
    tmux: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions, most recent first
    List {
        /// Include sessions outside this window's workspace
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Reload sessions from disk
    Refresh,

    /// Focus a session's terminal
    Focus {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },

    /// Delete sessions whose process has exited
    Cleanup,

    /// Delete every session
    RemoveAll,

    /// Give a session's working directory a display name
    Rename {
        #[arg(value_name = "SESSION_ID")]
        id: String,

        #[arg(value_name = "ALIAS")]
        alias: String,
    },

    /// Remove a session's display name
    Unalias {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },

    /// Keep running and answer focus requests for this window
    Watch,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        error!(error = %err, "agent-focus failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), FocusError> {
    let storage = match &cli.state_dir {
        Some(root) => StorageConfig::with_root(root.clone()),
        None => StorageConfig::from_env()?,
    };
    let settings = Settings::load_or_default(&storage.config_file());
    let mut engine = build_engine(&cli, storage, settings);

    match cli.command {
        Commands::List { all, json } => {
            engine.refresh_now()?;
            let sessions = if all {
                engine
                    .snapshot()
                    .all()
                    .into_iter()
                    .cloned()
                    .collect()
            } else {
                engine.sessions_for_window()
            };
            if json {
                output::print_json(&sessions)?;
            } else {
                output::print_table(&engine, &sessions);
            }
        }
        Commands::Refresh => {
            let snapshot = engine.refresh_now()?;
            let counts = snapshot.counts();
            println!(
                "{} sessions ({} attention, {} running, {} idle)",
                counts.total(),
                counts.attention,
                counts.running,
                counts.idle
            );
        }
        Commands::Focus { id } => {
            let outcome = engine.focus_session(&id)?;
            report_focus(&id, outcome)?;
        }
        Commands::Cleanup => {
            let report = engine.cleanup_now()?;
            output::print_report("Removed", &report);
        }
        Commands::RemoveAll => {
            let report = engine.remove_all()?;
            output::print_report("Removed", &report);
        }
        Commands::Rename { id, alias } => {
            let name = engine.rename_session(&id, &alias)?;
            println!("{} is now shown as {}", id, name);
        }
        Commands::Unalias { id } => {
            if !engine.unalias_session(&id)? {
                info!(session = %id, "Session had no alias");
            }
        }
        Commands::Watch => {
            engine.start()?;
            engine.subscribe(|snapshot| {
                let counts = snapshot.counts();
                info!(
                    attention = counts.attention,
                    running = counts.running,
                    idle = counts.idle,
                    "Sessions changed"
                );
            });
            engine.run()?;
        }
    }
    Ok(())
}

fn report_focus(id: &str, outcome: FocusOutcome) -> Result<(), FocusError> {
    match outcome {
        FocusOutcome::Focused {
            terminal,
            cleared_attention,
            ..
        } => {
            info!(session = %id, terminal = %terminal, cleared_attention, "Focused session");
            Ok(())
        }
        FocusOutcome::Broadcast { delivered: true } => {
            info!(session = %id, "Asked the owning window to focus the session");
            Ok(())
        }
        FocusOutcome::Broadcast { delivered: false } => {
            Err(FocusError::FocusRequestUndelivered(id.to_string()))
        }
    }
}

fn build_engine(cli: &Cli, storage: StorageConfig, settings: Settings) -> FocusEngine {
    let workspaces = if cli.workspaces.is_empty() {
        env::current_dir()
            .map(|dir| vec![dir.to_string_lossy().to_string()])
            .unwrap_or_default()
    } else {
        cli.workspaces.clone()
    };
    let runner = TmuxExecutor::new(cli.tmux.clone(), settings.probe_timeout());
    let host = TmuxHost::detect(runner, cli.window_id.clone(), workspaces);
    let inspector = SysinfoInspector::new(settings.probe_timeout());
    FocusEngine::new(storage, settings, Arc::new(inspector), Arc::new(host))
}

fn init_logging() {
    let debug_enabled = env::var("AGENT_FOCUS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
