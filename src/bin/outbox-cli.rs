use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use messaging_resilience::config::{load_config, ResilienceConfig};
use messaging_resilience::observability::{init_logging, init_metrics};
use messaging_resilience::outbox::{FileStore, RetryQueue};
use messaging_resilience::SystemClock;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "outbox-cli")]
#[command(about = "Inspect and maintain the durable message outbox", long_about = None)]
struct Cli {
    /// Resilience config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Outbox file; overrides `outbox.path` from the config
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Retry budget; overrides `outbox.max_retries` from the config
    #[arg(long)]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List messages still awaiting delivery
    Pending,
    /// List messages that exhausted their retries
    DeadLettered,
    /// Delete dead-lettered messages
    Purge,
    /// Show outbox counts
    Stats,
}

#[derive(Serialize)]
struct PurgeResult {
    purged: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };
    init_logging(&config.observability)?;
    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?)?;
    }

    if let Some(max_retries) = cli.max_retries {
        config.outbox.max_retries = max_retries;
    }
    let path = cli
        .store
        .or_else(|| config.outbox.path.as_ref().map(PathBuf::from))
        .ok_or("no outbox file: pass --store or set outbox.path")?;

    let store = FileStore::open(&path).await?;
    let max_retries = config.outbox.max_retries;
    let queue = RetryQueue::new(Arc::new(store), config.outbox, Arc::new(SystemClock));

    match cli.command {
        Commands::Pending => print_json(&queue.list_pending(max_retries).await?)?,
        Commands::DeadLettered => print_json(&queue.list_dead_lettered(max_retries).await?)?,
        Commands::Purge => {
            let purged = queue.purge_dead_lettered(max_retries).await?;
            print_json(&PurgeResult { purged })?;
        }
        Commands::Stats => print_json(&queue.stats().await?)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
