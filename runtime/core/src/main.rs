use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gesture_macros_core::{
    load_settings_from_path, logging, DefaultKeySender, KeySender, LoggingKeySender,
    RuntimeManager, StatusEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run gesture-triggered macros headless", long_about = None)]
struct Cli {
    /// Runtime settings file (YAML)
    #[arg(long, default_value = "settings.yaml")]
    settings: PathBuf,
    /// Store file to use instead of the one named in the settings
    #[arg(long)]
    store: Option<PathBuf>,
    /// Enable debug logging (RUST_LOG is honoured); `logging.debug` in the settings does the same
    #[arg(long)]
    debug: bool,
    /// Load everything but wait for detection to be started elsewhere
    #[arg(long)]
    no_autostart: bool,
    /// Log key combos instead of injecting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Settings errors are reported by `RuntimeManager::initialize` below.
    let settings = load_settings_from_path(&cli.settings).ok();
    logging::init(logging::debug_enabled(
        cli.debug,
        settings.as_ref().map(|loaded| &loaded.settings),
    ));

    let key_sender: Arc<dyn KeySender> = if cli.dry_run {
        Arc::new(LoggingKeySender::new())
    } else {
        Arc::new(DefaultKeySender::new())
    };

    let manager = RuntimeManager::initialize(cli.settings.clone(), cli.store.clone(), key_sender)
        .await
        .with_context(|| format!("starting from {}", cli.settings.display()))?;

    let mut status = manager.pipeline.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "status output lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !cli.no_autostart {
        if let Err(err) = manager.pipeline.start_detection().await {
            warn!(error = %err, "detection did not start");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    manager.shutdown().await;
    printer.abort();
    Ok(())
}

fn print_event(event: &StatusEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "failed to encode status event"),
    }
}
