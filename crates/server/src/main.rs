//! klaude — multi-agent session orchestrator for interactive LLM coding CLIs
//!
//! Run bare in a project directory to launch the wrapper instance (foreground
//! TUI + control socket). The other subcommands are thin clients over the
//! socket, read-side views over the shared store, or the out-of-band hook
//! entry points the TUI invokes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use klaude::config::Config;
use klaude::{client, cmd_install_hooks, cmd_instances, cmd_logs, cmd_sessions};
use klaude::{hooks, logging, orchestrator, paths};
use klaude_protocol::client::Action;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "klaude",
    about = "klaude — nested agent sessions for LLM coding CLIs",
    version = VERSION,
)]
struct Cli {
    /// Data directory (default: ~/.klaude)
    #[arg(long, global = true, env = "KLAUDE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Extra flags passed through to the TUI on every launch
    #[arg(last = true)]
    tui_flags: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List this project's sessions as a tree
    Sessions,

    /// Print a session's event log
    Logs {
        session_id: String,
        /// Only the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Switch the foreground TUI to another session (default: parent)
    Checkout {
        session_id: Option<String>,
        /// Seconds to wait for a resume id (0 disables polling)
        #[arg(long)]
        wait: Option<f64>,
    },

    /// Start a headless agent session
    Start {
        agent_type: String,
        /// Prompt text (joined with spaces)
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
        /// Parent session (default: the current foreground session)
        #[arg(long)]
        parent: Option<String>,
        /// Spawn N identical agents
        #[arg(long)]
        count: Option<u32>,
        /// Check out the new session once it is running
        #[arg(long)]
        checkout: bool,
        /// Resume the parent's conversation in the child
        #[arg(long)]
        share: bool,
        /// Do not surface child updates in this terminal
        #[arg(long)]
        detach: bool,
    },

    /// List live wrapper instances for this project
    Instances,

    /// Send a follow-up prompt to an agent session
    Message {
        session_id: String,
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
        /// Seconds to wait for a resume id when re-spawning
        #[arg(long)]
        wait: Option<f64>,
    },

    /// Signal an agent session's runtime process
    Interrupt {
        session_id: String,
        /// Signal name (default SIGINT)
        #[arg(long)]
        signal: Option<String>,
    },

    /// Hook entry points invoked by the TUI (not for interactive use)
    #[command(subcommand)]
    Hook(HookCommand),

    /// Install the session hooks into ~/.claude/settings.json
    InstallHooks {
        /// Path to settings.json (default: ~/.claude/settings.json)
        #[arg(long)]
        settings_path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum HookCommand {
    /// Record the TUI's conversation id for the calling session
    SessionStart,
    /// Close the conversation link for the calling session
    SessionEnd,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    paths::init_data_dir(cli.data_dir.as_deref());

    // Hook handlers run inside the TUI's hook pipeline: no logging setup, no
    // runtime, always exit 0.
    if let Some(Command::Hook(hook)) = &cli.command {
        let code = match hook {
            HookCommand::SessionStart => hooks::run_session_start(),
            HookCommand::SessionEnd => hooks::run_session_end(),
        };
        std::process::exit(code);
    }

    let project_root = std::env::current_dir()?;

    match cli.command {
        None => run_wrapper(project_root, cli.tui_flags),
        Some(Command::Sessions) => cmd_sessions::run(&project_root),
        Some(Command::Logs { session_id, tail }) => {
            let config = Config::load();
            cmd_logs::run(&project_root, &config, &session_id, tail)
        }
        Some(Command::Instances) => cmd_instances::run(&project_root),
        Some(Command::InstallHooks { settings_path }) => {
            cmd_install_hooks::run(settings_path.as_deref())
        }
        Some(Command::Checkout { session_id, wait }) => client_call(
            &project_root,
            Action::Checkout,
            json!({
                "sessionId": session_id,
                "fromSessionId": std::env::var("KLAUDE_SESSION_ID").ok(),
                "waitSeconds": wait,
            }),
        ),
        Some(Command::Start {
            agent_type,
            prompt,
            parent,
            count,
            checkout,
            share,
            detach,
        }) => client_call(
            &project_root,
            Action::StartAgent,
            json!({
                "agentType": agent_type,
                "prompt": prompt.join(" "),
                "parentSessionId": parent.or_else(|| std::env::var("KLAUDE_SESSION_ID").ok()),
                "agentCount": count,
                "options": { "checkout": checkout, "share": share, "detach": detach },
            }),
        ),
        Some(Command::Message {
            session_id,
            prompt,
            wait,
        }) => client_call(
            &project_root,
            Action::Message,
            json!({
                "sessionId": session_id,
                "prompt": prompt.join(" "),
                "waitSeconds": wait,
            }),
        ),
        Some(Command::Interrupt { session_id, signal }) => client_call(
            &project_root,
            Action::Interrupt,
            json!({ "sessionId": session_id, "signal": signal }),
        ),
        Some(Command::Hook(_)) => unreachable!("handled above"),
    }
}

/// Run the wrapper instance to completion and exit with the TUI's code.
fn run_wrapper(project_root: PathBuf, tui_flags: Vec<String>) -> anyhow::Result<()> {
    paths::ensure_dirs()?;
    let logging = logging::init_logging()?;
    let _log_guard = logging.guard;

    let config = Config::load();

    info!(
        component = "main",
        event = "main.starting",
        run_id = %logging.run_id,
        version = VERSION,
        pid = std::process::id(),
        project_root = %project_root.display(),
        "Starting klaude wrapper"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let exit_code = runtime.block_on(async {
        let orchestrator = orchestrator::Orchestrator::initialize(project_root, config, tui_flags)?;
        orchestrator.run().await
    })?;

    std::process::exit(exit_code);
}

/// Send one request to the live instance and print the result.
fn client_call(
    project_root: &std::path::Path,
    action: Action,
    payload: serde_json::Value,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(client::call(project_root, action, payload))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
