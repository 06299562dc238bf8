//! # Table Queue CLI
//!
//! Command-line interface for operating a table-backed queue.
//!
//! This module provides CLI commands for:
//! - Creating the queue table
//! - Sending messages
//! - Running a consumer that acknowledges and logs every message
//! - Inspecting queue statistics and retained failures
//! - Showing the resolved settings

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use table_queue_core::{
    Config, ConfigError, Consumer, Context, Disposition, Message, Priority, Producer, QueueError,
    QueueName, QueueSettings, QueueStats, SqliteStore, Status, Store,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Table Queue CLI - job and message queue on a single database table
#[derive(Parser, Debug)]
#[command(name = "table-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Job and message queue backed by a relational table")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TABLE_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configured path
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the queue table if it does not exist
    Init,

    /// Send a message
    Send {
        /// Target queue
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Message body, stored as given
        #[arg(short, long)]
        body: String,

        /// Priority from -2 to 2; lower values are served first
        #[arg(
            short,
            long,
            default_value = "0",
            allow_hyphen_values = true,
            value_parser = clap::value_parser!(i16).range(-2..=2)
        )]
        priority: i16,

        /// Keep the message invisible for this many seconds
        #[arg(long, default_value = "0")]
        delay_seconds: u32,

        /// Event tag
        #[arg(short, long)]
        event: Option<String>,
    },

    /// Consume messages, acknowledging each one after logging it
    Consume {
        /// Queues to consume; at least one, may be repeated
        #[arg(short, long = "queue", required = true)]
        queues: Vec<String>,

        /// Stop after this many resolved messages
        #[arg(short, long)]
        max_messages: Option<usize>,
    },

    /// Show message counts per status
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List messages kept with status FAILURE
    Failures {
        /// Only show failures from this queue
        #[arg(short, long)]
        queue: Option<String>,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI operation errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output rendering failed: {message}")]
    Output { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
            Self::Output { .. } => 5,
        }
    }
}

fn output_error(err: impl std::fmt::Display) -> CliError {
    CliError::Output {
        message: err.to_string(),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli.log_level, cli.json_logs)?;
    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = resolve_settings(&cli)?;

    match cli.command {
        Commands::Init => execute_init_command(&settings).await,
        Commands::Send {
            queue,
            body,
            priority,
            delay_seconds,
            event,
        } => execute_send_command(&settings, &queue, body, priority, delay_seconds, event).await,
        Commands::Consume {
            queues,
            max_messages,
        } => execute_consume_command(&settings, &queues, max_messages).await,
        Commands::Stats { format } => execute_stats_command(&settings, format).await,
        Commands::Failures {
            queue,
            limit,
            format,
        } => execute_failures_command(&settings, queue, limit, format).await,
        Commands::Config { format } => {
            println!("{}", render_settings(&settings, format)?);
            Ok(())
        }
    }
}

/// Install the global tracing subscriber; logs go to stderr
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })
}

/// Load settings and apply command-line overrides
pub fn resolve_settings(cli: &Cli) -> Result<QueueSettings, CliError> {
    let mut settings = QueueSettings::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        settings.database_path = database.clone();
    }
    Ok(settings)
}

async fn open_store(settings: &QueueSettings) -> Result<Arc<SqliteStore>, CliError> {
    let store = SqliteStore::open(&settings.database_path, settings.store_options())?;
    store.init().await?;
    Ok(Arc::new(store))
}

fn producer_for(settings: &QueueSettings, store: Arc<SqliteStore>) -> Arc<Producer> {
    Arc::new(Producer::new(store, Arc::new(Config::from_settings(settings))))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_init_command(settings: &QueueSettings) -> Result<(), CliError> {
    open_store(settings).await?;
    println!(
        "Initialized table \"{}\" in {}",
        settings.table_name,
        settings.database_path.display()
    );
    Ok(())
}

async fn execute_send_command(
    settings: &QueueSettings,
    queue: &str,
    body: String,
    priority: i16,
    delay_seconds: u32,
    event: Option<String>,
) -> Result<(), CliError> {
    let priority = Priority::try_from(priority).map_err(QueueError::from)?;
    let store = open_store(settings).await?;
    let producer = producer_for(settings, store);

    let mut message = producer
        .create_message(queue, body.as_str())?
        .with_priority(priority)
        .with_delay(i64::from(delay_seconds));
    if let Some(event) = event {
        message = message.with_event(event);
    }

    let sent = producer.send(message).await?;
    println!("{}", sent.id().map_err(QueueError::from)?);
    Ok(())
}

async fn execute_consume_command(
    settings: &QueueSettings,
    queues: &[String],
    max_messages: Option<usize>,
) -> Result<(), CliError> {
    let queues = queues
        .iter()
        .map(|queue| QueueName::new(queue.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(QueueError::from)?;

    let store = open_store(settings).await?;
    let producer = producer_for(settings, store.clone());
    let mut consumer = Consumer::new(store, producer).with_idle_sleep(settings.idle_sleep());
    for queue in &queues {
        consumer.bind(queue.as_str(), log_and_acknowledge)?;
    }

    let (sender, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = sender.send(true);
        }
    });

    let handled = consumer.run(&queues, shutdown, max_messages).await;
    println!("Handled {} messages", handled);
    Ok(())
}

async fn log_and_acknowledge(ctx: Context) -> anyhow::Result<Disposition> {
    let message = ctx.message();
    info!(
        message_id = ?message.id().ok(),
        queue = %message.queue(),
        event = ?message.event(),
        attempts = message.attempts(),
        body = %message.body(),
        "Message received"
    );
    Ok(Disposition::Ack)
}

async fn execute_stats_command(
    settings: &QueueSettings,
    format: OutputFormat,
) -> Result<(), CliError> {
    let store = open_store(settings).await?;
    let stats = store.stats().await?;
    println!("{}", render_stats(&stats, format)?);
    Ok(())
}

async fn execute_failures_command(
    settings: &QueueSettings,
    queue: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<(), CliError> {
    let queue = queue
        .map(QueueName::new)
        .transpose()
        .map_err(QueueError::from)?;
    let store = open_store(settings).await?;
    let failures = store.list_by_status(Status::Failure, queue, limit).await?;
    println!("{}", render_failures(&failures, format)?);
    Ok(())
}

// ============================================================================
// Rendering
// ============================================================================

pub fn render_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Text => {
            let mut lines: Vec<String> = Status::ALL
                .iter()
                .map(|status| format!("{:<18}{}", status.as_str(), stats.count(*status)))
                .collect();
            lines.push(format!("{:<18}{}", "TOTAL", stats.total()));
            Ok(lines.join("\n"))
        }
        OutputFormat::Json => serde_json::to_string_pretty(stats).map_err(output_error),
        OutputFormat::Yaml => serde_yaml::to_string(stats).map_err(output_error),
    }
}

pub fn render_failures(messages: &[Message], format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Text => {
            if messages.is_empty() {
                return Ok("No failed messages".to_string());
            }
            let lines: Vec<String> = messages
                .iter()
                .map(|message| {
                    format!(
                        "{}  {}  attempts={}  {}",
                        message
                            .id()
                            .map(|id| id.to_string())
                            .unwrap_or_else(|_| "-".to_string()),
                        message.queue(),
                        message.attempts(),
                        message.error().unwrap_or("-")
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
        OutputFormat::Json => serde_json::to_string_pretty(messages).map_err(output_error),
        OutputFormat::Yaml => serde_yaml::to_string(messages).map_err(output_error),
    }
}

pub fn render_settings(settings: &QueueSettings, format: ConfigFormat) -> Result<String, CliError> {
    match format {
        ConfigFormat::Toml => toml::to_string_pretty(settings).map_err(output_error),
        ConfigFormat::Json => serde_json::to_string_pretty(settings).map_err(output_error),
        ConfigFormat::Yaml => serde_yaml::to_string(settings).map_err(output_error),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
