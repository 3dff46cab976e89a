use mintwatch::config::Config;
use mintwatch::dispatch::{BatchCadence, Dispatcher, LocalSigner, RpcChainClient, TxTemplate};
use mintwatch::feed::{ActivityEvent, FeedWatcher, OkxActivityFeed};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("MINTWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("mintwatch.toml"));
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("mintwatch v{} starting", env!("CARGO_PKG_VERSION"));
    if !config_path.exists() {
        info!(path = %config_path.display(), "no config file found, using env-only config");
    }

    if !config.dispatcher.enabled && !config.feed.enabled {
        warn!("dispatcher and feed watcher both disabled, nothing to do");
        return Ok(());
    }

    // --- Dispatcher ---
    let dispatcher_task = if config.dispatcher.enabled {
        config.validate_dispatcher()?;

        let client = RpcChainClient::new_http(
            &config.chain.rpc_url,
            Duration::from_millis(config.dispatcher.receipt_poll_interval_ms),
        )?;
        match client.chain_id().await {
            Ok(id) if id != config.chain.chain_id => warn!(
                node = id,
                configured = config.chain.chain_id,
                "node chain id differs from configured chain id"
            ),
            Ok(id) => info!(chain_id = id, "connected to chain"),
            Err(e) => warn!(error = %e, "chain id query failed"),
        }

        let signer = LocalSigner::from_hex(&config.chain.private_key)?;
        let template = TxTemplate::from_config(&config.chain)?;
        let dispatcher = Dispatcher::new(
            Arc::new(client),
            Arc::new(signer),
            template,
            Duration::from_secs(config.dispatcher.receipt_timeout_secs),
        );
        let cadence = BatchCadence::from_config(&config.dispatcher);

        info!(
            sender = %dispatcher.sender(),
            batch_size = cadence.batch_size,
            interval_ms = cadence.interval.as_millis() as u64,
            "dispatcher enabled"
        );
        Some(tokio::spawn(async move {
            dispatcher.run_batches(&cadence).await;
        }))
    } else {
        None
    };

    // --- Feed watcher ---
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ActivityEvent>();
    if config.feed.enabled {
        let feed = OkxActivityFeed::new(&config.feed)?;
        let watcher = FeedWatcher::new(
            Arc::new(feed),
            Duration::from_secs(config.feed.poll_interval_secs),
            config.feed.cold_start,
            event_tx,
        );
        info!(
            ticker = %config.feed.ticker,
            cold_start = ?config.feed.cold_start,
            "feed watcher enabled"
        );
        watcher.start();
    } else {
        drop(event_tx);
    }

    match dispatcher_task {
        // Dispatcher only: run until the batch limit or Ctrl-C.
        Some(handle) if !config.feed.enabled => {
            tokio::select! {
                joined = handle => {
                    if let Err(e) = joined {
                        error!(error = %e, "dispatcher task ended abnormally");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down...");
                }
            }
        }
        _ => loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    info!(
                        time = %event.formatted_time(),
                        ticker = %event.ticker,
                        kind = %event.type_name,
                        amount = event.amount,
                        unit_usd = event.unit_price_usd,
                        total_usd = event.total_price_usd,
                        "NEW ACTIVITY"
                    );
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down...");
                    break;
                }
            }
        },
    }

    Ok(())
}
