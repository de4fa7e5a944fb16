//! hello-patient: terminal client for the Hello Patient chatbot.
//!
//! Resumes the last conversation (or starts one) and chats over the
//! backend's WebSocket stream. Inside a chat:
//!
//!   /new    Start a new conversation (asks first)
//!   /quit   Leave
//!
//! Logs go to stderr; set `RUST_LOG` to see them.

mod config;
mod view;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hello_patient_sdk::api::HttpApi;
use hello_patient_sdk::identity::{THREAD_ID_KEY, USER_ID_KEY};
use hello_patient_sdk::session::RESET_PROMPT;
use hello_patient_sdk::store::{FileStore, Store};
use hello_patient_sdk::transport::WsTransport;
use hello_patient_sdk::{Event, SessionConfig};
use tokio::sync::mpsc;

use crate::config::{Config, Resolved};
use crate::view::View;

#[derive(Parser, Debug)]
#[command(name = "hello-patient", about = "Chat with the Hello Patient assistant", version)]
pub struct Cli {
    /// Backend base URL (default: http://localhost:8000)
    #[arg(long, env = "HELLO_PATIENT_API_URL")]
    pub api_url: Option<String>,

    /// User id for the first conversation (ignored once one is saved)
    #[arg(long)]
    pub user_id: Option<String>,

    /// File holding the saved user and thread ids
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Chat with the assistant (default)
    Chat,
    /// Show the backend's current user
    Whoami,
    /// Show the saved user and thread ids
    Status,
    /// Forget the saved conversation so the next chat starts fresh
    Forget,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hello_patient=warn,hello_patient_sdk=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolved = Resolved::merge(&cli, &Config::load());
    tracing::debug!(?resolved, "Resolved settings");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&resolved).await,
        Command::Whoami => whoami(&resolved).await,
        Command::Status => status(&resolved),
        Command::Forget => forget(&resolved),
    }
}

async fn chat(resolved: &Resolved) -> Result<()> {
    let config = SessionConfig {
        api_url: resolved.api_url.clone(),
        default_user_id: resolved.user_id.clone(),
        ..Default::default()
    };
    let store = Arc::new(FileStore::open(&resolved.state_file));
    let (handle, mut events) = hello_patient_sdk::spawn(
        config,
        Arc::new(HttpApi::new(&resolved.api_url)),
        store,
        Arc::new(WsTransport::new()),
    );

    tracing::info!(api_url = %resolved.api_url, "Starting chat");
    println!("Type a message and press Enter. /new starts over, /quit leaves.");

    let mut input = stdin_lines();
    let mut view = View::default();
    let mut quitting = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Shutdown) | None => break,
                Some(event) => {
                    for line in view.apply(&event) {
                        println!("{line}");
                    }
                }
            },
            line = input.recv(), if !quitting => match line.as_deref().map(str::trim) {
                None | Some("/quit") => {
                    quitting = true;
                    handle.shutdown().await?;
                }
                Some("/new") => {
                    print!("{RESET_PROMPT} [y/N] ");
                    std::io::stdout().flush()?;
                    let answer = input.recv().await.unwrap_or_default();
                    if !handle.reset(|_: &str| view::is_yes(&answer)).await? {
                        println!("Keeping the current conversation.");
                    }
                }
                Some("") => {}
                Some(text) => handle.send(text).await?,
            },
        }
    }

    Ok(())
}

/// Forward stdin lines from a blocking reader thread.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn whoami(resolved: &Resolved) -> Result<()> {
    let user = HttpApi::new(&resolved.api_url).current_user().await?;
    println!("{} (id {})", user.name, user.id);
    Ok(())
}

fn status(resolved: &Resolved) -> Result<()> {
    let store = FileStore::open(&resolved.state_file);
    let show = |key: &str| store.get(key).unwrap_or_else(|| "(none)".to_string());
    println!("state file: {}", store.path().display());
    println!("user id:    {}", show(USER_ID_KEY));
    println!("thread id:  {}", show(THREAD_ID_KEY));
    Ok(())
}

fn forget(resolved: &Resolved) -> Result<()> {
    let store = FileStore::open(&resolved.state_file);
    store.remove(THREAD_ID_KEY)?;
    println!("Forgot the saved conversation. The next chat starts a new one.");
    Ok(())
}
