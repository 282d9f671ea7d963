//! agent-focus-hook: publishes agent session state for agent-focus.
//!
//! Invoked by the agent's lifecycle hooks. Each call writes (or deletes) the
//! calling agent's session file under `<stateDir>/sessions/`. Never prints on
//! success; diagnostics go to `<stateDir>/logs/hook.log`.
//!
//! ## Subcommands
//!
//! - `start`, `attention`, `idle`, `end`: explicit lifecycle actions
//! - `handle`: maps a Claude Code hook payload read from stdin

mod handle;
mod logging;
mod producer;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use focus_core::StorageConfig;

use crate::producer::{HookError, SessionContext, Transition};

#[derive(Parser)]
#[command(name = "agent-focus-hook")]
#[command(about = "Agent session state publisher")]
#[command(version)]
struct Cli {
    /// State directory (default: ~/.agent-focus)
    #[arg(long, global = true, env = "AGENT_FOCUS_HOME")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct SessionArgs {
    /// Session id (default: ppid-<agent pid>)
    #[arg(long, env = "AGENT_FOCUS_SESSION_ID")]
    session_id: Option<String>,

    /// Working directory of the agent (default: current directory)
    #[arg(long)]
    cwd: Option<String>,

    /// Pid of the terminal shell hosting the agent (default: the agent's parent)
    #[arg(long, env = "AGENT_FOCUS_TERMINAL_PID")]
    terminal_pid: Option<u32>,

    /// Identity of the window that spawned the agent
    #[arg(long, env = "AGENT_FOCUS_WINDOW_ID")]
    window_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark the session running
    Start(SessionArgs),

    /// Mark the session as waiting on the user
    Attention {
        /// What the agent is waiting on (e.g. permission_prompt)
        #[arg(long)]
        reason: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Mark the session idle
    Idle(SessionArgs),

    /// Remove the session
    End(SessionArgs),

    /// Handle a Claude Code hook event (reads JSON from stdin)
    Handle(SessionArgs),
}

fn main() {
    let cli = Cli::parse();

    let storage = match cli.state_dir {
        Some(root) => StorageConfig::with_root(root),
        None => match StorageConfig::from_env() {
            Ok(storage) => storage,
            Err(err) => {
                eprintln!("agent-focus-hook: {}", err);
                std::process::exit(1);
            }
        },
    };
    let _logging_guard = logging::init(&storage);

    let result = match cli.command {
        Commands::Start(args) => apply(&storage, &args, Transition::Running),
        Commands::Attention { reason, session } => {
            apply(&storage, &session, Transition::Attention { reason })
        }
        Commands::Idle(args) => apply(&storage, &args, Transition::Idle),
        Commands::End(args) => apply(&storage, &args, Transition::End),
        Commands::Handle(args) => handle::run(&storage, &args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "agent-focus-hook failed");
        std::process::exit(1);
    }
}

fn apply(
    storage: &StorageConfig,
    args: &SessionArgs,
    transition: Transition,
) -> Result<(), HookError> {
    let context = SessionContext::resolve(storage, args)?;
    producer::apply(storage, &context, &transition)
}
