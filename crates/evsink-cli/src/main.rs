//! evsink CLI - at-least-once Kafka event ingestion with retry and dead-letter topics.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use evsink_core::config::LogFormat;
use evsink_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Kafka-related error (connection, provisioning, producer)
    KafkaError = 2,
    /// Event store could not be opened
    StoreError = 3,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code, preferring the core error variant and
    /// falling back to the message.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<evsink_core::Error>() {
            return match core {
                evsink_core::Error::Config(_) => ExitCode::ConfigError,
                evsink_core::Error::Kafka(_) => ExitCode::KafkaError,
                evsink_core::Error::Store(_) => ExitCode::StoreError,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("kafka") || error_str.contains("broker") {
            ExitCode::KafkaError
        } else if error_str.contains("store") {
            ExitCode::StoreError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "evsink")]
#[command(
    about = "Kafka event ingestion with bounded retries and a dead-letter topic",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline
    Run(KafkaOverrides),

    /// Create the retry and dead-letter topics if missing
    Provision(KafkaOverrides),

    /// Validate configuration
    Validate,

    /// Show status and health of a running pipeline
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },
}

/// Command-line overrides applied after the config file and environment.
#[derive(Args, Debug, Default)]
struct KafkaOverrides {
    /// Override Kafka bootstrap servers (comma-separated)
    #[arg(long)]
    bootstrap_servers: Option<String>,

    /// Override main topic
    #[arg(long)]
    topic: Option<String>,

    /// Override consumer group
    #[arg(long)]
    consumer_group: Option<String>,

    /// Override client id
    #[arg(long)]
    client_id: Option<String>,
}

impl KafkaOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(servers) = &self.bootstrap_servers {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(topic) = &self.topic {
            config.kafka.topic = topic.clone();
        }
        if let Some(group) = &self.consumer_group {
            config.kafka.consumer_group = group.clone();
        }
        if let Some(client_id) = &self.client_id {
            config.kafka.client_id = client_id.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses; errors are
    // reported once logging is up.
    let loaded = load_config(cli.config.as_deref());
    init_logging(cli.verbose, loaded.as_ref().ok());

    let result = match loaded {
        Ok(config) => execute_command(cli.command, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

fn init_logging(verbose: u8, config: Option<&Config>) {
    let log_format = config
        .map(|c| c.monitoring.log_format.clone())
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new(
                config
                    .map(|c| c.monitoring.log_level.as_directive())
                    .unwrap_or("info"),
            ),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }
}

/// Execute the CLI command.
async fn execute_command(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Run(overrides) => {
            overrides.apply(&mut config);
            config.validate()?;
            commands::run::run(config).await?;
        }

        Commands::Provision(overrides) => {
            overrides.apply(&mut config);
            config.validate()?;
            commands::provision::run(config).await?;
        }

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
            println!("  Bootstrap servers: {}", config.kafka.bootstrap_list());
            println!("  Main topic:        {}", config.kafka.topic);
            println!("  Consumer group:    {}", config.kafka.consumer_group);
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }
    }

    Ok(())
}

/// Read the config file (explicit path, else `./config.toml` if present, else
/// defaults) and apply environment overrides. Validation happens per command.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let default_path = Path::new("config.toml");
    let mut config = match path {
        Some(path) => Config::read_file(path)?,
        None if default_path.exists() => Config::read_file(default_path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}
