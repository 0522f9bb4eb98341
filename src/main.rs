pub mod clock;
pub mod config;
pub mod driver;
pub mod indicator;
pub mod input;
pub mod link;
pub mod report;

use crate::clock::SystemClock;
use crate::driver::Driver;
use crate::link::UDC_CLASS_DIR;
use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = config::config_path();
    info!("Loading config from {}", config_path.display());
    let config = config::load_or_create(&config_path).await?;
    config
        .validate()
        .map_err(|e| eyre!("Invalid config {}: {}", config_path.display(), e))?;

    let cancel = CancellationToken::new();

    // USB lifecycle comes from the device controller in sysfs
    let (link_tx, link_rx) = mpsc::channel(16);
    let watcher = match link::resolve_state_path(Path::new(UDC_CLASS_DIR), config.link.udc.as_deref())
    {
        Ok(state_path) => Some(link::spawn_watcher(
            state_path,
            config.link_poll(),
            link_tx,
            cancel.clone(),
        )),
        Err(e) if config.link.wait_for_host => {
            return Err(eyre!("Cannot follow the USB link: {}", e));
        }
        Err(e) => {
            warn!("Running without link events: {}", e);
            None
        }
    };

    let driver = Driver::from_config(&config, Arc::new(SystemClock::new()), link_rx)
        .map_err(|e| eyre!("Failed to set up hardware: {}", e))?;

    let stopper = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
        stopper.cancel();
    });

    if let Some(polling) = driver.wait_for_host(&cancel).await {
        polling.run_until_cancelled(cancel.clone()).await;
    }

    cancel.cancel();
    if let Some(watcher) = watcher {
        if let Err(e) = watcher.await {
            warn!("Link watcher task failed: {}", e);
        }
    }

    info!("DualJoy stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
