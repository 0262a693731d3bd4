//! crm-db - operator entry point.
//!
//! Owns the client lifecycle: open, diagnostics, wait for a signal, close.

use clap::{Parser, Subcommand};
use crm_db::config::{Config, RunMode};
use crm_db::db::{DbClient, DiagnosticsReporter};
use crm_db::models::{QueryParam, Statement};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "crm-db", version, about = "CRM data-access core")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the pool and keep it until SIGINT/SIGTERM (default)
    Serve,
    /// Run the health check and print the status as JSON
    Health,
    /// Run a read query and print the rows as JSON
    Query {
        /// SQL with `?` placeholders
        sql: String,
        /// Placeholder values in order; JSON literals, anything else is text
        #[arg(long = "param")]
        params: Vec<String>,
    },
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// `5` and `true` bind as numbers and booleans; bare words bind as text.
fn parse_param(raw: &str) -> QueryParam {
    serde_json::from_str(raw).unwrap_or_else(|_| QueryParam::String(raw.to_string()))
}

/// Resolves with the name of the signal received.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
            "SIGINT"
        }
        _ = terminate => {
            info!("Received SIGTERM");
            "SIGTERM"
        }
    }
}

async fn serve(config: &Config, client: DbClient) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = client.open().await {
        error!(error = %e, "Failed to open database connection");
        if config.mode == RunMode::Production {
            std::process::exit(1);
        }
        return Err(e.into());
    }

    let reporter = config.is_development().then(|| {
        DiagnosticsReporter::spawn(
            client.clone(),
            config.diagnostics_interval(),
            config.heap_warning_bytes(),
        )
    });

    info!(backend = %client.backend(), "Ready; waiting for shutdown signal");
    let signal = wait_for_signal().await;

    drop(reporter);
    client.shutdown(Some(signal)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the environment may be set directly
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = cli.config;
    init_tracing(&config);

    info!(mode = %config.mode, "Starting crm-db v{}", env!("CARGO_PKG_VERSION"));

    let client = match DbClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Invalid database configuration");
            if config.mode == RunMode::Production {
                std::process::exit(1);
            }
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, client).await?,
        Command::Health => {
            let status = client.check_health().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            client.shutdown(None).await;
            if !status.healthy {
                std::process::exit(1);
            }
        }
        Command::Query { sql, params } => {
            let statement =
                Statement::new(sql).with_params(params.iter().map(|p| parse_param(p)).collect());
            let result = client.fetch_records(&statement).await;
            client.shutdown(None).await;
            let rows = result.map_err(|e| {
                error!(error = %e, "Query failed");
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
