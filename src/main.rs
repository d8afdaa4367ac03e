//! Mira memory CLI
//!
//! A line-oriented console over the memory engine. Plain lines are user
//! turns; the assembled prompt context is printed after each one.

use clap::Parser;
use mira_memory::{BufferKind, HeuristicConsolidator, MemoryConfig, MemoryEngine};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mira memory - bounded dialogue windows with idle-time consolidation
#[derive(Parser, Debug)]
#[command(name = "mira-memory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of the durable store (overrides the config file)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Session id for this console
    #[arg(short, long, default_value = "console")]
    session: String,

    /// Verbose output: debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// One parsed console line
#[derive(Debug, PartialEq)]
enum Command {
    Say(String),
    Reply(String),
    Buffer(BufferKind, serde_json::Value),
    Focus { hours: i64, content: String },
    Consolidate,
    Status,
    Quit,
    Help,
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();

    match name {
        "reply" if !arg.is_empty() => Command::Reply(arg.to_string()),
        "fact" if !arg.is_empty() => {
            Command::Buffer(BufferKind::Fact, json!({ "content": arg, "tags": [] }))
        }
        "pref" if !arg.is_empty() => {
            Command::Buffer(BufferKind::Preference, json!({ "content": arg, "tags": [] }))
        }
        "profile" => match arg.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Command::Buffer(
                BufferKind::ProfileUpdate,
                json!({ "profile_data": { key.trim(): value.trim() } }),
            ),
            _ => Command::Invalid("usage: /profile key=value".to_string()),
        },
        "focus" => {
            let (hours, content) = arg.split_once(' ').unwrap_or((arg, ""));
            match hours.parse::<i64>() {
                Ok(hours) if hours > 0 && !content.trim().is_empty() => Command::Focus {
                    hours,
                    content: content.trim().to_string(),
                },
                _ => Command::Invalid("usage: /focus <hours> <text>".to_string()),
            }
        }
        "consolidate" => Command::Consolidate,
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        _ => Command::Invalid(format!("unknown or incomplete command: /{}", name)),
    }
}

const HELP: &str = "\
Plain text        add a user turn and print the prompt context
/reply <text>     record the agent's reply to the last user turn
/fact <text>      buffer an extracted fact
/pref <text>      buffer an extracted preference
/profile k=v      buffer a profile update
/focus <h> <text> store a short-term focus event expiring in <h> hours
/consolidate      run a consolidation pass now
/status           show buffer counts
/quit             exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => MemoryConfig::load(path)?,
        None => MemoryConfig::default(),
    };
    if let Some(store_dir) = cli.store_dir.clone() {
        config = config.with_store_dir(store_dir);
    }

    info!("Starting mira-memory (session {})", cli.session);
    let engine = MemoryEngine::new(config, Arc::new(HeuristicConsolidator::new())).await?;
    let scheduler = engine.start_scheduler();

    // Read stdin on a plain thread so the runtime keeps polling the scheduler
    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut last_user_input: Option<String> = None;
    while let Some(line) = line_rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Command::Say(text) => {
                let session = engine.begin_turn(&cli.session);
                let context = engine
                    .prepare_turn_with(&session, &text, engine.store().as_ref())
                    .await;
                print_context(&context)?;
                last_user_input = Some(text);
            }
            Command::Reply(text) => {
                let session = engine.begin_turn(&cli.session);
                let user_input = last_user_input.take().unwrap_or_default();
                if let Err(e) = engine.finish_turn(&session, &user_input, &text).await {
                    error!("Failed to record exchange: {}", e);
                }
            }
            Command::Buffer(kind, content) => {
                engine.activity().touch();
                let id = engine.buffer(kind, content);
                println!("buffered {} item {}", kind, id);
            }
            Command::Focus { hours, content } => {
                let now = chrono::Utc::now();
                let expire = now + chrono::Duration::hours(hours);
                engine
                    .store()
                    .save_focus_event(&content, &now.to_rfc3339(), &expire.to_rfc3339(), Vec::new())
                    .await?;
                println!("focus event stored until {}", expire.to_rfc3339());
            }
            Command::Consolidate => {
                let report = engine.consolidate_now().await;
                for outcome in &report.buffers {
                    match &outcome.error {
                        None => println!(
                            "{}: {} items -> {} records",
                            outcome.kind, outcome.snapshotted, outcome.persisted
                        ),
                        Some(e) => println!("{}: kept for retry ({})", outcome.kind, e),
                    }
                }
                println!("significant events: {}", report.significant_events);
            }
            Command::Status => {
                let status = engine.buffers().status();
                println!(
                    "facts={} preferences={} profile_updates={} sessions={} scheduler={:?}",
                    status.facts,
                    status.preferences,
                    status.profile_updates,
                    engine.registry().len(),
                    engine.scheduler().state()
                );
            }
            Command::Help => println!("{}", HELP),
            Command::Invalid(message) => println!("{}", message),
            Command::Quit => break,
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn print_context(context: &mira_memory::TurnContext) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if !context.memories.is_empty() {
        writeln!(out, "--- memories ---")?;
        for memory in &context.memories {
            let text = memory
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| memory.to_string());
            writeln!(out, "* {}", text)?;
        }
    }
    writeln!(out, "--- history ---")?;
    for message in &context.history {
        writeln!(out, "{}", message)?;
    }
    out.flush()
}
