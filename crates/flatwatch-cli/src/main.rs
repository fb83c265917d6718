use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flatwatch_adapters::AdapterRegistry;
use flatwatch_notify::{forward_errors, DiscordChannel, ErrorForwardLayer};
use flatwatch_storage::{FileSeenStore, HttpFetcher, SeenStore};
use flatwatch_sync::{
    preview, Deduplicator, DeliveryScheduler, DiscordSettings, ImageFingerprinter, SyncConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Upper bound on posting queued error logs once the scheduler has stopped.
const FORWARD_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "flatwatch-cli")]
#[command(about = "Watches rental flat listings and posts new ones to Discord")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the delivery scheduler until interrupted.
    Run {
        /// Run a single cycle and print its report.
        #[arg(long)]
        once: bool,
    },
    /// Show what the next cycle would deliver, without recording or sending anything.
    Preview {
        #[arg(long)]
        json: bool,
    },
    /// List the configured listing sources.
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("loading configuration")?;
    let command = cli.command.unwrap_or(Commands::Run { once: false });

    let forwarded = init_tracing(&config, matches!(command, Commands::Run { .. }));
    debug!("running in debug mode");

    match command {
        Commands::Run { once } => run(&config, once, forwarded).await,
        Commands::Preview { json } => run_preview(&config, json).await,
        Commands::Sources => {
            for name in registry(&config)?.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Installs the fmt subscriber. When errors should reach the developer channel, the
/// receiving end of the forwarding layer is returned.
fn init_tracing(config: &SyncConfig, forward: bool) -> Option<UnboundedReceiver<String>> {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (layer, rx) = if forward && !config.debug {
        let (layer, rx) = ErrorForwardLayer::new();
        (Some(layer), Some(rx))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(layer)
        .init();

    if forward && config.debug {
        info!("error forwarding to the developer channel is inactive in debug mode");
    }
    rx
}

fn registry(config: &SyncConfig) -> Result<AdapterRegistry> {
    let registry = AdapterRegistry::all(config.adapter_settings());
    if config.sources.is_empty() {
        return Ok(registry);
    }
    let registry = registry.retain_named(&config.sources);
    if registry.is_empty() {
        bail!("FLATWATCH_SOURCES={:?} matches no known source", config.sources);
    }
    Ok(registry)
}

async fn run(
    config: &SyncConfig,
    once: bool,
    forwarded: Option<UnboundedReceiver<String>>,
) -> Result<()> {
    let discord = config.discord()?;
    let forwarder = match forwarded {
        Some(rx) => {
            let dev = DiscordChannel::new(discord.token.clone(), discord.dev_channel, config.http_timeout())?;
            let (flush_tx, flush_rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(forward_errors(rx, dev, async move {
                let _ = flush_rx.await;
            }));
            Some((flush_tx, handle))
        }
        None => None,
    };

    let result = serve(config, once, &discord).await;
    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "scheduler stopped");
    }

    if let Some((flush_tx, handle)) = forwarder {
        let _ = flush_tx.send(());
        if timeout(FORWARD_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("developer channel did not drain before exit");
        }
    }
    result
}

async fn serve(config: &SyncConfig, once: bool, discord: &DiscordSettings) -> Result<()> {
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let registry = registry(config)?;
    let offers = DiscordChannel::new(discord.token.clone(), discord.offers_channel, config.http_timeout())?;

    let store = FileSeenStore::open(&config.found_offers_file).await?;
    let cold_start = store.is_empty();
    info!(
        path = %store.path().display(),
        known = store.len(),
        cold_start,
        "seen store loaded"
    );

    let mut scheduler =
        DeliveryScheduler::new(config.scheduler_settings(), registry, http, store, offers)
            .with_first_cycle(cold_start);

    if once {
        let report = scheduler.run_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    scheduler.run(shutdown_signal()).await
}

async fn run_preview(config: &SyncConfig, json: bool) -> Result<()> {
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let registry = registry(config)?;
    let store = FileSeenStore::open(&config.found_offers_file).await?;
    let deduplicator = Deduplicator::new(Arc::new(ImageFingerprinter::new(Arc::clone(&http))));

    let result = preview(&config.scheduler_settings(), &registry, http, &store, &deduplicator).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "preview: all={} new={} filtered={} deduplicated={}",
        result.all,
        result.new,
        result.filtered,
        result.listings.len()
    );
    for listing in &result.listings {
        println!(
            "[{}] {} | {} | {}\n    {}",
            listing.source.name, listing.title, listing.location, listing.price, listing.link
        );
        for duplicate in &listing.duplicates {
            println!("    also: {}", duplicate.link);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
