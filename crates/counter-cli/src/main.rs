//! CLI entry point for the counter service.
//!
//! Loads configuration (defaults, TOML file, `.env`, `COUNTER_*` variables,
//! then `--url`), connects to the store once, runs one subcommand, and prints
//! its JSON envelope on stdout. Operation failures are reported in the
//! envelope and turn the exit status non-zero; configuration and connection
//! failures abort before any command runs.

mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use counter_store::{CounterService, StoreClient, StoreConfig, StoreResult};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, StatsTarget};
use crate::output::Response;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = StoreConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    if let Some(url) = cli.url.clone() {
        config = config.with_url(url);
    }

    let client = StoreClient::connect(&config.url)
        .await
        .context("failed to connect to the store")?;
    info!(endpoint = client.endpoint(), "connected");

    let response = run(&cli.command, client, &config).await;
    println!(
        "{}",
        serde_json::to_string(&response).context("failed to encode response")?
    );

    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr so stdout carries only the JSON envelope.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn run(command: &Commands, client: StoreClient, config: &StoreConfig) -> Response {
    let counters = CounterService::new(client.clone(), config);
    match dispatch(command, &client, &counters).await {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, "command failed");
            Response::error(&err)
        }
    }
}

async fn dispatch(
    command: &Commands,
    client: &StoreClient,
    counters: &CounterService,
) -> StoreResult<Response> {
    let response = match command {
        Commands::Ping => {
            client.ping().await?;
            Response::entry("endpoint", client.endpoint())
        }
        Commands::Create { namespace, secret } => {
            let key = counters.create(namespace, secret.as_deref()).await?;
            Response::entry(key, namespace)
        }
        Commands::Get { namespace, key } => {
            Response::ok(counters.get(namespace, key.as_deref()).await?)
        }
        Commands::Increment {
            namespace,
            key,
            secret,
        } => Response::ok(vec![counters.increment(namespace, secret, key).await?]),
        Commands::Reset {
            namespace,
            key,
            value,
            secret,
        } => {
            counters.reset(namespace, secret, key, value).await?;
            Response::ok(Vec::new())
        }
        Commands::Delete {
            namespace,
            key,
            secret,
        } => {
            let removed = counters.delete(namespace, secret, key).await?;
            Response::entry("deleted", removed)
        }
        Commands::Stats { target } => {
            let count = match target {
                StatsTarget::Namespaces => counters.count_namespaces().await? as i64,
                StatsTarget::Keys => counters.count_keys().await? as i64,
                StatsTarget::Requests => counters.count_requests().await?,
            };
            Response::entry(target.label(), count)
        }
    };
    Ok(response)
}
