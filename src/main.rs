//! # Autopost — recurring Telegram delivery daemon
//!
//! Usage:
//!   autopost run                          # Start the dispatch engine
//!   autopost add @group --text "..." --interval 300
//!   autopost list                         # Show tasks and counters
//!   autopost pause <id> / resume <id> / remove <id>
//!   autopost set-interval <id> <seconds>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use autopost_channels::{TelegramNotify, TelegramSender};
use autopost_core::config::AutopostConfig;
use autopost_core::task::{Destination, Payload, Task, TaskDefinition};
use autopost_core::traits::NotifySink;
use autopost_engine::DispatchEngine;
use autopost_store::TaskStore;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "autopost",
    version,
    about = "📮 Autopost — recurring Telegram delivery daemon"
)]
struct Cli {
    /// Path to config file (default: ~/.autopost/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dispatch engine and run until interrupted
    Run,
    /// Add a recurring task
    Add {
        /// Destination chat: @username or numeric id
        chat: String,
        /// Message text (HTML)
        #[arg(long)]
        text: String,
        /// Forum topic id (0 = main chat)
        #[arg(long)]
        topic: Option<i64>,
        /// Photo to attach (text becomes the caption)
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Seconds between deliveries
        #[arg(long, default_value = "300")]
        interval: u64,
        /// Symmetric random offset in seconds applied per cycle
        #[arg(long, default_value = "0")]
        jitter: u64,
    },
    /// List all tasks with their counters
    List,
    /// Pause a task (kept in the store, not scheduled)
    Pause { id: String },
    /// Resume a paused task
    Resume { id: String },
    /// Delete a task and its attachment
    Remove { id: String },
    /// Change a task's interval
    SetInterval { id: String, seconds: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "autopost=debug"
    } else {
        "autopost=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AutopostConfig::load_from(std::path::Path::new(path))?,
        None => AutopostConfig::load()?,
    };
    let store_path = shellexpand::tilde(&config.store_path).to_string();
    let store = Arc::new(TaskStore::open(std::path::Path::new(&store_path))?);

    match cli.command {
        Command::Run => run(config, store).await,
        Command::Add {
            chat,
            text,
            topic,
            photo,
            interval,
            jitter,
        } => {
            let mut definition = TaskDefinition::new(
                Destination {
                    chat,
                    topic_id: topic,
                },
                Payload {
                    text,
                    attachment: photo,
                },
                config.engine.clamp_interval(interval),
            );
            definition.jitter_secs = jitter;
            let task = Task::new(definition);
            store.upsert(&task)?;
            println!("✅ Task {} created ({} every {}s)", task.id, task.destination, task.interval_secs);
            println!("   Starts on the next `autopost run`; a running daemon adopts it on a later health sweep.");
            Ok(())
        }
        Command::List => {
            let tasks = store.load()?;
            if tasks.is_empty() {
                println!("No tasks yet. Create one with `autopost add`.");
                return Ok(());
            }
            for task in tasks {
                let status = if task.active { "🟢" } else { "🔴" };
                println!(
                    "{status} {}  {}  every {}s  sent {}  failed {}  last error: {}",
                    task.id,
                    task.destination,
                    task.interval_secs,
                    task.sent_count,
                    task.failed_count,
                    task.last_error.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::Pause { id } => {
            store.set_active(&id, false)?;
            println!("⏸ Task {id} paused.");
            Ok(())
        }
        Command::Resume { id } => {
            // Only the flag is flipped: last_activity stays stale, so a
            // running daemon's next health sweep adopts the task promptly.
            store.set_active(&id, true)?;
            println!("▶️ Task {id} resumed; a running daemon picks it up on its next health sweep.");
            Ok(())
        }
        Command::Remove { id } => {
            store.delete(&id)?;
            println!("🗑 Task {id} removed.");
            Ok(())
        }
        Command::SetInterval { id, seconds } => {
            let clamped = config.engine.clamp_interval(seconds);
            store.set_interval(&id, clamped)?;
            println!("⏱ Task {id} interval set to {clamped}s.");
            Ok(())
        }
    }
}

async fn run(config: AutopostConfig, store: Arc<TaskStore>) -> Result<()> {
    if !config.telegram.enabled || config.telegram.bot_token.is_empty() {
        bail!(
            "Telegram is not configured; set telegram.bot_token in {}",
            AutopostConfig::default_path().display()
        );
    }

    let sender = TelegramSender::new(config.telegram.clone());
    let me = sender
        .get_me()
        .await
        .context("Telegram token validation failed")?;
    tracing::info!(
        "🤖 Bot: @{} ({})",
        me.username.as_deref().unwrap_or("unknown"),
        me.first_name
    );

    let sink: Option<Arc<dyn NotifySink>> = if config.notify.enabled && config.notify.chat_id.is_some() {
        Some(Arc::new(TelegramNotify::new(
            config.telegram.clone(),
            config.notify.clone(),
        )))
    } else {
        tracing::info!("owner notifications disabled (set notify.chat_id to enable)");
        None
    };

    let engine = DispatchEngine::new(store, Arc::new(sender), sink, config.engine);
    engine.start().await?;

    tracing::info!("⏰ Engine running — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
