//! Waggle Hook
//!
//! The executable the host CLI invokes for every lifecycle event: one JSON
//! object in on stdin, one JSON object out on stdout, diagnostics on
//! stderr, exit code 0. Also carries operator subcommands for the
//! coordination database.

mod commands;

use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use waggle_core::hooks::{dispatch, EnvContext, HookEvent, HookOutput};
use waggle_core::state::CoordDb;

/// Reading the hook body from stdin gives up after this long.
const STDIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "waggle-hook", about = "Agent coordination hooks for a coding-assistant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations to the coordination database
    Migrate,
    /// Show sessions with a recent heartbeat
    Sessions {
        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,
    },
    /// Check store reachability and report table counts
    Health,
    /// Show research findings recorded for a topic
    Findings {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    // stdout is the protocol channel; all diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WAGGLE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_hook().await,
        Some(Command::Migrate) => commands::migrate(),
        Some(Command::Sessions { project }) => commands::sessions(project.as_deref()),
        Some(Command::Health) => commands::health(),
        Some(Command::Findings { topic, limit }) => commands::findings(&topic, limit),
    }
}

/// Process one hook event. Every failure path prints `{}` and exits 0: the
/// host must never be blocked by its coordination layer.
async fn run_hook() {
    let body = match read_stdin().await {
        Some(body) if !body.trim().is_empty() => body,
        _ => {
            tracing::warn!("no hook body on stdin within {:?}", STDIN_TIMEOUT);
            println!("{{}}");
            return;
        }
    };

    let event = match HookEvent::from_json(body.trim()) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("malformed hook body: {}", e);
            println!("{{}}");
            return;
        }
    };

    let env = EnvContext::capture();

    let output = match CoordDb::open() {
        Ok(db) => {
            // rusqlite is blocking; keep the runtime's worker threads clear
            tokio::task::spawn_blocking(move || dispatch(&db, &env, &event))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("dispatch task panicked: {}", e);
                    HookOutput::empty()
                })
        }
        Err(e) => {
            tracing::error!("coordination store unavailable: {:#}", e);
            HookOutput::empty()
        }
    };

    println!("{}", output.to_json());
}

async fn read_stdin() -> Option<String> {
    let mut body = String::new();
    let mut stdin = tokio::io::stdin();
    let read = tokio::time::timeout(STDIN_TIMEOUT, stdin.read_to_string(&mut body));

    match read.await {
        Ok(Ok(_)) => Some(body),
        Ok(Err(e)) => {
            tracing::warn!("stdin read failed: {}", e);
            None
        }
        Err(_) => None,
    }
}
