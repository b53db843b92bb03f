//! bionic - ask a two-tier brain from the terminal
//!
//! Usage:
//!   bionic ask "what's the weather in Paris?"   → answer one question
//!   bionic chat                                 → interactive session
//!   bionic config                               → print the effective config

use anyhow::Context;
use bionic::local::LocalBrain;
use bionic_core::{BrainConfig, EventSink, ThinkingEvent, ThinkingEventType};
use bionic_llm::CancellationToken;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bionic",
    about = "Two-tier cognitive dispatch over OpenAI-compatible models",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the brain config file (TOML). Default: ~/.bionic/brain.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: Vec<String>,
        /// Print thinking events as they arrive
        #[arg(short, long)]
        verbose: bool,
        /// Print the whole response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Chat in the terminal
    Chat {
        /// Print thinking events as they arrive
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the effective config as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            question,
            verbose,
            json,
        } => {
            let question = question.join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("no question given");
            }
            let buffer = config.dispatch.event_buffer;
            let local = LocalBrain::new(config)?;
            let response = ask(&local, &question, verbose, buffer).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer);
            }
        }
        Commands::Chat { verbose } => {
            let buffer = config.dispatch.event_buffer;
            let local = LocalBrain::new(config)?;
            chat(&local, verbose, buffer).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bionic=info,bionic_brain=info,bionic_llm=info".into());
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("invalid log file path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BrainConfig> {
    if let Some(path) = path {
        return BrainConfig::load_strict(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let default_path = std::env::var("BIONIC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".bionic/brain.toml")
        });
    Ok(BrainConfig::load(&default_path))
}

/// One request, cancelled by Ctrl-C.
async fn ask(
    local: &LocalBrain,
    question: &str,
    verbose: bool,
    buffer: usize,
) -> anyhow::Result<bionic_core::ThinkingResponse> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let (events, printer) = if verbose {
        let (events, mut rx) = EventSink::channel("cli", buffer);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });
        (events, Some(printer))
    } else {
        (EventSink::disabled(), None)
    };

    let result = local.ask(question, events, cancel).await;
    watcher.abort();
    if let Some(printer) = printer {
        // the sink was dropped with the request, so the printer drains and exits
        let _ = printer.await;
    }
    Ok(result?)
}

async fn chat(local: &LocalBrain, verbose: bool, buffer: usize) -> anyhow::Result<()> {
    println!("bionic v{} - :jobs lists schedules, :clear forgets history, :quit exits", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" | "exit" => break,
            ":clear" => {
                local.history().clear().await;
                println!("history cleared");
                continue;
            }
            ":jobs" => {
                let jobs = local.scheduler().jobs().await;
                if jobs.is_empty() {
                    println!("no scheduled tasks");
                }
                for job in jobs {
                    println!("{}  {}  {}", job.name, job.cron, job.message);
                }
                continue;
            }
            _ => {}
        }

        match ask(local, line, verbose, buffer).await {
            Ok(response) => {
                println!("{}", response.answer);
                if let Some(to) = response.send_to {
                    println!("(for {})", to);
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}

fn print_event(event: &ThinkingEvent) {
    match event.event_type {
        ThinkingEventType::Chunk => {}
        ThinkingEventType::Progress => {
            eprintln!("  [{:>3.0}%] {}", event.progress, event.content)
        }
        ThinkingEventType::ToolCall => eprintln!("  → {}", event.content),
        ThinkingEventType::ToolResult => eprintln!("  ← {}", event.content),
        ThinkingEventType::Error => eprintln!("  ! {}", event.content),
        ThinkingEventType::Start | ThinkingEventType::Complete => {
            tracing::debug!(event = ?event.event_type, "{}", event.content)
        }
    }
}
