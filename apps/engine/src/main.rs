use std::sync::Arc;

use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use availability_cell::AvailabilityService;
use reassignment_cell::{ChannelEventSink, OfferReaper, ReassignmentEngine};
use shared_config::AppConfig;
use waitlist_cell::WaitlistStore;

use commands::EngineCommand;

/// Runs the reassignment engine over line-delimited JSON: commands in on
/// stdin, outbound engine events out on stdout. HTTP transport, persistence
/// and messaging are external collaborators wired to those two streams.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting waitlist reassignment engine");

    let config = AppConfig::from_env();

    let store = Arc::new(WaitlistStore::new(config.max_missed_offers));
    let availability = Arc::new(AvailabilityService::new());
    let (sink, mut events) = ChannelEventSink::channel();
    let engine = Arc::new(ReassignmentEngine::new(
        store.clone(),
        availability.clone(),
        Arc::new(sink),
        &config,
    ));
    let reaper = Arc::new(OfferReaper::new(
        engine.clone(),
        store.clone(),
        config.reaper_interval_seconds,
    ));

    let reaper_task = {
        let reaper = reaper.clone();
        tokio::spawn(async move { reaper.start().await })
    };

    // Outbound events go to stdout, one JSON object per line.
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if stdout.write_all(line.as_bytes()).await.is_err()
                        || stdout.write_all(b"\n").await.is_err()
                        || stdout.flush().await.is_err()
                    {
                        error!("Outbound event stream closed unexpectedly");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize engine event: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EngineCommand>(line) {
            Ok(command) => {
                if let Err(e) = commands::dispatch(command, &engine, &store, &availability).await {
                    warn!("Command failed: {:#}", e);
                }
            }
            Err(e) => warn!("Unparseable command: {}", e),
        }
    }

    info!("Input stream closed, shutting down");
    reaper.shutdown().await;
    let _ = reaper_task.await;
    drop(reaper);
    drop(engine);
    let _ = printer.await;

    Ok(())
}
