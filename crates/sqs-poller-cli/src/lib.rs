//! # SQS Poller CLI
//!
//! Command-line runner for the SQS poller.
//!
//! This module provides CLI commands for:
//! - Running a worker against an SQS queue with a built-in handler
//! - Validating and printing the resolved configuration
//!
//! Configuration is layered: an optional file, then `SQS_POLLER__` environment
//! variables, then command-line flags.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sqs_poller::providers::AwsSqsTransport;
use sqs_poller::{
    handler_fn, AwsCredentials, AwsSqsConfig, HandlerError, MessageHandler, QueueTransport,
    QueueUrl, RetryPolicy, ValidationError, Worker, WorkerConfig, MAX_BATCH_SIZE,
    MAX_WAIT_SECONDS,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "SQS_POLLER";

// ============================================================================
// CLI Structure
// ============================================================================

/// SQS Poller - long-polling queue worker
#[derive(Parser, Debug)]
#[command(name = "sqs-poller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Long-polling worker for SQS queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SQS_POLLER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive, overridden by RUST_LOG
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll a queue until interrupted
    Run(RunArgs),

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Flags of the `run` command. Every flag overrides the configured value.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Full URL of the queue
    #[arg(long, conflicts_with = "queue_name")]
    pub queue_url: Option<String>,

    /// Queue name, resolved to a URL through GetQueueUrl
    #[arg(long)]
    pub queue_name: Option<String>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// SQS endpoint override, e.g. http://localhost:4566
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Messages requested per receive (1-10)
    #[arg(long)]
    pub max_messages: Option<u32>,

    /// Long-poll wait per receive in seconds (0-20)
    #[arg(long)]
    pub wait_seconds: Option<u32>,

    /// Where to read AWS credentials from
    #[arg(long, value_enum)]
    pub credentials: Option<CredentialSource>,

    /// Built-in message handler
    #[arg(long, value_enum)]
    pub handler: Option<HandlerKind>,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

/// Source of the AWS credentials
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`
    #[default]
    Env,
    /// `aws.credentials` in the configuration
    Config,
}

/// Built-in handlers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Print each message body to stdout
    #[default]
    Echo,
    /// Print bodies that parse as JSON; acknowledge anything else as an invalid event
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport setup failed: {message}")]
    Transport { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Transport { .. } => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Failed to render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Fully resolved runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Queue URL; takes precedence over `queue_name`
    #[serde(default)]
    pub queue_url: Option<String>,

    /// Queue name resolved through GetQueueUrl
    #[serde(default)]
    pub queue_name: Option<String>,

    #[serde(default)]
    pub handler: HandlerKind,

    #[serde(default)]
    pub credential_source: CredentialSource,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default = "default_aws")]
    pub aws: AwsSqsConfig,
}

fn default_aws() -> AwsSqsConfig {
    AwsSqsConfig::new("us-east-1")
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            queue_name: None,
            handler: HandlerKind::default(),
            credential_source: CredentialSource::default(),
            worker: WorkerSettings::default(),
            aws: default_aws(),
        }
    }
}

/// Worker settings; the queue URL is resolved separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub max_batch_size: u32,
    pub wait_seconds: u32,
    pub logging_enabled: bool,
    /// Abort handlers this long after shutdown; unset waits for all of them
    pub shutdown_grace_period_seconds: Option<u64>,
    pub receive_backoff: Option<RetryPolicy>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            wait_seconds: MAX_WAIT_SECONDS,
            logging_enabled: true,
            shutdown_grace_period_seconds: None,
            receive_backoff: None,
        }
    }
}

impl WorkerSettings {
    pub fn to_worker_config(&self, queue_url: QueueUrl) -> WorkerConfig {
        WorkerConfig {
            queue_url,
            max_batch_size: self.max_batch_size,
            wait_seconds: self.wait_seconds,
            logging_enabled: self.logging_enabled,
            shutdown_grace_period_seconds: self.shutdown_grace_period_seconds,
            receive_backoff: self.receive_backoff.clone(),
        }
    }
}

impl PollerConfig {
    /// Apply `run` flags on top of the loaded configuration
    pub fn apply_run_args(&mut self, args: &RunArgs) {
        if let Some(url) = &args.queue_url {
            self.queue_url = Some(url.clone());
            self.queue_name = None;
        }
        if let Some(name) = &args.queue_name {
            self.queue_name = Some(name.clone());
            self.queue_url = None;
        }
        if let Some(region) = &args.region {
            self.aws.region = region.clone();
        }
        if let Some(endpoint) = &args.endpoint {
            self.aws.endpoint = Some(endpoint.clone());
        }
        if let Some(max_messages) = args.max_messages {
            self.worker.max_batch_size = max_messages;
        }
        if let Some(wait_seconds) = args.wait_seconds {
            self.worker.wait_seconds = wait_seconds;
        }
        if let Some(source) = args.credentials {
            self.credential_source = source;
        }
        if let Some(handler) = args.handler {
            self.handler = handler;
        }
    }

    /// Check everything that can be checked without contacting SQS
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aws.validate()?;

        let queue_url = match (&self.queue_url, &self.queue_name) {
            (Some(url), _) => QueueUrl::new(url.as_str())?,
            // The real URL comes from GetQueueUrl at run time
            (None, Some(name)) if !name.trim().is_empty() => {
                QueueUrl::new(format!("{}/{}", self.aws.endpoint_url(), name.trim()))?
            }
            _ => {
                return Err(ConfigError::MissingRequired {
                    key: "queue_url or queue_name".to_string(),
                })
            }
        };

        // Same checks Worker::new applies, so `config` and `run` agree
        self.worker
            .to_worker_config(queue_url)
            .validate()
            .map_err(|e| match e {
                ValidationError::OutOfRange { field, message } => ValidationError::OutOfRange {
                    field: format!("worker.{}", field),
                    message,
                },
                other => other,
            })?;

        if self.credential_source == CredentialSource::Config && self.aws.credentials.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "aws.credentials".to_string(),
            });
        }

        Ok(())
    }

    /// Copy safe to print: secrets replaced
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(credentials) = copy.aws.credentials.as_mut() {
            credentials.secret_access_key = "<redacted>".to_string();
            if credentials.session_token.is_some() {
                credentials.session_token = Some("<redacted>".to_string());
            }
        }
        copy
    }

    /// Render in the requested format
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let render_error = |message: String| ConfigError::Render { message };
        match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| render_error(e.to_string())),
            ConfigFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| render_error(e.to_string()))
            }
            ConfigFormat::Toml => toml::to_string(self).map_err(|e| render_error(e.to_string())),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    execute(cli).await
}

/// Run a parsed command line; logging must already be initialised
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let mut config = load_configuration(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            config.apply_run_args(&args);
            execute_run_command(config).await
        }
        Commands::Config { show, format } => execute_config_command(&config, show, format),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Install the global subscriber. `RUST_LOG` wins over `--log-level`.
/// Logs go to stderr so stdout carries only handler output.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    // A subscriber may already be installed (tests, embedding); keep it
    let _ = if cli.json_logs {
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

    Ok(())
}

/// Load configuration from the optional file and the process environment
pub fn load_configuration(path: Option<&Path>) -> Result<PollerConfig, ConfigError> {
    load_configuration_with_env(path, None)
}

/// Load configuration; `env` replaces the process environment when given
pub fn load_configuration_with_env(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<PollerConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    // e.g. SQS_POLLER__WORKER__MAX_BATCH_SIZE=5 sets worker.max_batch_size
    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

fn execute_config_command(
    config: &PollerConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    config.validate()?;

    if show {
        let rendered = config.redacted().render(format)?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        if !rendered.ends_with('\n') {
            writeln!(stdout)?;
        }
    } else {
        info!("Configuration is valid");
    }

    Ok(())
}

async fn execute_run_command(mut config: PollerConfig) -> Result<(), CliError> {
    config.validate()?;

    if config.credential_source == CredentialSource::Env {
        config.aws.credentials = Some(AwsCredentials::from_env().map_err(ConfigError::from)?);
    }

    let transport = Arc::new(
        AwsSqsTransport::new(config.aws.clone()).map_err(|e| CliError::Transport {
            message: e.to_string(),
        })?,
    );

    let queue_url = match (&config.queue_url, &config.queue_name) {
        (Some(url), _) => QueueUrl::new(url.as_str()).map_err(ConfigError::from)?,
        (None, Some(name)) => {
            transport
                .resolve_queue_url(name)
                .await
                .map_err(|e| CliError::Transport {
                    message: format!("could not resolve queue '{}': {}", name, e),
                })?
        }
        (None, None) => {
            return Err(ConfigError::MissingRequired {
                key: "queue_url or queue_name".to_string(),
            }
            .into())
        }
    };

    let worker_config = config.worker.to_worker_config(queue_url.clone());
    let worker = Worker::new(
        worker_config,
        transport as Arc<dyn QueueTransport>,
        build_handler(config.handler),
    )
    .map_err(ConfigError::from)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    info!(queue = %queue_url, handler = ?config.handler, "Starting worker");
    let stats = worker.run(shutdown).await;
    info!(
        batches = stats.batches,
        received = stats.messages_received,
        deleted = stats.messages_deleted,
        receive_errors = stats.receive_errors,
        handler_failures = stats.handler_failures,
        "Worker stopped"
    );

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
pub async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), finishing current batch"),
        _ = terminate => info!("Received SIGTERM, finishing current batch"),
    }

    shutdown.cancel();
}

// ============================================================================
// Built-in Handlers
// ============================================================================

pub fn build_handler(kind: HandlerKind) -> Arc<dyn MessageHandler> {
    match kind {
        HandlerKind::Echo => Arc::new(handler_fn(|message, _shutdown| async move {
            let body = String::from_utf8_lossy(message.body()).into_owned();
            print_line(&body)
        })),
        HandlerKind::Json => Arc::new(handler_fn(|message, _shutdown| async move {
            let value = parse_json_body(message.body())?;
            print_line(&value.to_string())
        })),
    }
}

/// Parse a message body as JSON; anything else is an invalid event
pub fn parse_json_body(body: &[u8]) -> Result<serde_json::Value, HandlerError> {
    serde_json::from_slice(body).map_err(|e| HandlerError::invalid_event("json", e.to_string()))
}

fn print_line(line: &str) -> Result<(), HandlerError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)
        .context("writing message to stdout")
        .map_err(HandlerError::from)
}
