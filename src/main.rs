// livemap - live map client engine
// Licensed under AGPL v3

use clap::Parser;
use livemap::config::Config;
use livemap::coordinator::Coordinator;
use livemap::input::spawn_feed;
use livemap::prefs::{JsonFilePreferences, MemoryPreferences, PreferenceStore};
use livemap::surface::LogSurface;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Zoom the log surface starts at, before any fix.
const INITIAL_ZOOM: f64 = 11.0;
const INPUT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_logging(config.verbose);

    let settings = config.settings()?;
    info!("Starting livemap session {}", settings.session_id);
    if let Some(url) = &settings.base_url {
        info!("Frame backend: {}", url);
    }

    let prefs: Box<dyn PreferenceStore> = match &config.prefs {
        Some(path) => Box::new(JsonFilePreferences::open(path)),
        None => Box::new(MemoryPreferences::new()),
    };

    let coordinator = Coordinator::new(settings, LogSurface::new(INITIAL_ZOOM), prefs)?;

    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
    let _feed = if config.input == "-" {
        spawn_feed(BufReader::new(tokio::io::stdin()), input_tx)
    } else {
        let file = tokio::fs::File::open(&config.input).await?;
        info!("Reading events from {}", config.input);
        spawn_feed(BufReader::new(file), input_tx)
    };

    coordinator
        .run(input_rx, async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
        })
        .await;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
