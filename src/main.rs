//! Binary entry point for webhook-engine.
//!
//! This binary provides the CLI interface for registering endpoints,
//! delivering events, and running the background delivery worker.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use webhook_engine::cli::{self, OutputFormat};
use webhook_engine::models::Event;
use webhook_engine::observability::{self, InitOptions};
use webhook_engine::{EngineConfig, WebhookService};

/// webhook-engine - Signed, retried outbound webhook delivery.
#[derive(Parser)]
#[command(name = "webhook-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "WEBHOOK_ENGINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Register a webhook endpoint.
    Create {
        /// Destination URL (http or https).
        url: String,

        /// Subscribed event types (repeatable; none means all events).
        #[arg(short, long = "events", value_delimiter = ',')]
        events: Vec<String>,

        /// Free-form description.
        #[arg(short, long)]
        description: Option<String>,

        /// Signing secret (generated when omitted).
        #[arg(long)]
        secret: Option<String>,
    },

    /// List webhook endpoints.
    List {
        /// Include disabled endpoints.
        #[arg(short, long)]
        all: bool,
    },

    /// Show one webhook endpoint.
    Show {
        /// Webhook ID.
        id: String,
    },

    /// Disable a webhook endpoint.
    Disable {
        /// Webhook ID.
        id: String,
    },

    /// Re-enable a webhook endpoint.
    Enable {
        /// Webhook ID.
        id: String,
    },

    /// Replace a webhook's signing secret.
    RotateSecret {
        /// Webhook ID.
        id: String,
    },

    /// Deliver an event to a webhook endpoint.
    Deliver {
        /// Webhook ID.
        id: String,

        /// Event type (e.g. `invoice.created`).
        event_type: String,

        /// Event data as JSON.
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Send a test event to a webhook endpoint.
    Test {
        /// Webhook ID.
        id: String,
    },

    /// Retry a delivery immediately.
    Retry {
        /// Delivery ID.
        delivery_id: String,
    },

    /// Show delivery attempts.
    History {
        /// Attempts of one delivery.
        #[arg(long, conflicts_with = "endpoint")]
        delivery: Option<String>,

        /// Recent attempts of one webhook.
        #[arg(long)]
        endpoint: Option<String>,

        /// Maximum number of attempts.
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show delivery statistics for a webhook.
    Stats {
        /// Webhook ID.
        id: String,
    },

    /// Delete finished delivery history.
    Purge {
        /// Age threshold in days.
        #[arg(long, default_value = "30")]
        older_than_days: u64,
    },

    /// Compute the signature of a payload.
    Sign {
        /// Signing secret.
        #[arg(long, env = "WEBHOOK_ENGINE_SECRET")]
        secret: String,

        /// Payload; read from stdin when omitted.
        payload: Option<String>,
    },

    /// Verify the signature of a payload.
    Verify {
        /// Signing secret.
        #[arg(long, env = "WEBHOOK_ENGINE_SECRET")]
        secret: String,

        /// Signature header value (`sha256=<hex>`).
        #[arg(long)]
        signature: String,

        /// Payload; read from stdin when omitted.
        payload: Option<String>,
    },

    /// Run the background delivery worker.
    Worker {
        /// Run a single tick and exit.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Worker { once: false });
    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, &config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command; `Ok(false)` reports a negative outcome.
async fn run_command(cli: Cli, config: &EngineConfig) -> anyhow::Result<bool> {
    let format = cli.format;
    let service = WebhookService::from_config(config).with_context(|| {
        format!(
            "failed to open webhook store at {}",
            config.database_path().display()
        )
    })?;

    match cli.command {
        Commands::Create {
            url,
            events,
            description,
            secret,
        } => cli::cmd_webhook_create(&service, &url, events, description, secret, format)?,

        Commands::List { all } => cli::cmd_webhook_list(&service, all, format)?,

        Commands::Show { id } => cli::cmd_webhook_show(&service, &id, format)?,

        Commands::Disable { id } => cli::cmd_webhook_set_active(&service, &id, false)?,

        Commands::Enable { id } => cli::cmd_webhook_set_active(&service, &id, true)?,

        Commands::RotateSecret { id } => cli::cmd_webhook_rotate_secret(&service, &id)?,

        Commands::Deliver {
            id,
            event_type,
            data,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            let event = Event::new(event_type, data);
            return Ok(cli::cmd_webhook_deliver(&service, &id, event, format).await?);
        },

        Commands::Test { id } => return Ok(cli::cmd_webhook_test(&service, &id, format).await?),

        Commands::Retry { delivery_id } => {
            return Ok(cli::cmd_webhook_retry(&service, &delivery_id, format).await?);
        },

        Commands::History {
            delivery,
            endpoint,
            limit,
        } => cli::cmd_webhook_history(
            &service,
            delivery.as_deref(),
            endpoint.as_deref(),
            limit,
            format,
        )?,

        Commands::Stats { id } => cli::cmd_webhook_stats(&service, &id, format)?,

        Commands::Purge { older_than_days } => cli::cmd_webhook_purge(&service, older_than_days)?,

        Commands::Sign { secret, payload } => {
            let payload = read_payload(payload)?;
            cli::cmd_webhook_sign(&service, payload.as_bytes(), &secret);
        },

        Commands::Verify {
            secret,
            signature,
            payload,
        } => {
            let payload = read_payload(payload)?;
            return Ok(cli::cmd_webhook_verify(
                &service,
                payload.as_bytes(),
                &signature,
                &secret,
            ));
        },

        Commands::Worker { once: true } => {
            let report = service.worker().run_once().await?;
            cli::print_tick_report(&report);
        },

        Commands::Worker { once: false } => {
            let handle = service.spawn_worker();
            eprintln!("Delivery worker running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            eprintln!("Shutting down delivery worker...");
            handle.shutdown().await;
        },
    }

    Ok(true)
}

/// Returns the payload argument, or all of stdin when it is absent.
fn read_payload(payload: Option<String>) -> anyhow::Result<String> {
    if let Some(payload) = payload {
        return Ok(payload);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read payload from stdin")?;
    Ok(buf)
}
