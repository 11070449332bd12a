//! PulseBot CLI binary.
//!
//! Subcommands: `run` (agent loop + producers), `serve` (WebSocket channel
//! facade), `chat` (local line client), `setup` (create streams), `init`
//! (write default config), `task list`. Exit code 0 on success, 1 on any
//! unrecoverable startup error.

mod chat;
mod logging;
mod template;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use env_config::Config;
use pulsebot::{bootstrap, init_streams, verify_streams, LogStore, ProtonClient, ProtonLogs};

#[derive(Parser, Debug)]
#[command(name = "pulsebot")]
#[command(about = "PulseBot: stream-native conversational agent runtime")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", default_value = "pulsebot.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the agent loop and scheduled producers
    Run,
    /// Start the WebSocket channel facade
    Serve {
        /// Listen address
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Chat with the agent from this terminal
    Chat {
        /// Session id to continue; default starts a new session
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },
    /// Create the five streams on the streaming DB (idempotent)
    Setup,
    /// Write a default pulsebot.yaml into the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Scheduled task helpers
    Task {
        #[command(subcommand)]
        cmd: TaskCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// List configured scheduled tasks
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // `init` must work before any config exists.
    if let Command::Init { force } = args.cmd {
        let path = template::write_default_config(&args.config, force)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let config = Config::load(&args.config)?;
    logging::init(&config.logging);

    match args.cmd {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Setup => {
            let client = ProtonClient::new(&config.database);
            init_streams(&client).await?;
            verify_streams(&client).await?;
            println!("streams ready on {}:{}", config.database.host, config.database.query_port);
            Ok(())
        }
        Command::Run => run_agent(&config).await,
        Command::Serve { addr } => {
            let client = Arc::new(ProtonClient::new(&config.database));
            verify_streams(&client).await?;
            let logs: Arc<dyn LogStore> = Arc::new(ProtonLogs::new(client));
            serve::run_serve(&addr, logs).await
        }
        Command::Chat { session } => chat::run(&config, session).await,
        Command::Task {
            cmd: TaskCommand::List,
        } => {
            if config.scheduled_tasks.is_empty() {
                println!("no scheduled tasks configured");
                return Ok(());
            }
            for (name, task) in &config.scheduled_tasks {
                let timing = task
                    .interval_minutes
                    .map(|m| format!("every {m}m"))
                    .or_else(|| task.daily_time.clone().map(|t| format!("daily at {t} UTC")))
                    .unwrap_or_else(|| "default timing".to_string());
                println!(
                    "{name:<16} {} {timing}",
                    if task.enabled { "enabled " } else { "disabled" },
                );
            }
            Ok(())
        }
    }
}

/// Agent mode: verify schema, start producers and the loop, drain on ctrl-c.
async fn run_agent(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let shutdown = CancellationToken::new();
    let runtime = bootstrap::build_runtime(config, shutdown.clone())?;
    verify_streams(&runtime.client).await?;

    let mut handles = Arc::clone(&runtime.producers).spawn();
    let agent = Arc::clone(&runtime.agent);
    handles.push(tokio::spawn(async move { agent.run().await }));
    info!(agent = %config.agent.name, "pulsebot running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down, draining in-flight work");
    shutdown.cancel();
    for handle in handles {
        // Bounded drain: an in-flight turn gets a grace period, then we go.
        let _ = tokio::time::timeout(Duration::from_secs(15), handle).await;
    }
    Ok(())
}
