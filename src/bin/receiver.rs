//! Multicast Receiver Application
//!
//! Plays every enabled channel of the planar multicast feed on the local
//! output device, one worker per channel.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dante_receiver::{
    audio::list_output_devices,
    config::AppConfig,
    network::probe_server,
    protocol::NetworkConfig,
    volume::VolumeStore,
    workers::{LoggingSink, RegistrySettings, SystemBackend, WorkerRegistry},
};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting multicast receiver");

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load_or_create(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    tracing::info!("Configuration: {}", path.display());

    // List available output devices
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.pool_threads.max(1))
        .thread_name("channel-worker")
        .enable_all()
        .build()
        .context("building worker runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    let network = NetworkConfig::from_provider(&config).context("invalid network settings")?;
    let server = probe_server(
        &network.server_address,
        network.server_port,
        network.timeout,
    )
    .await;
    tracing::info!("Server status: {}", serde_json::to_string(&server)?);

    let settings = RegistrySettings::from(&config.workers);
    let volumes = Arc::new(VolumeStore::from_channels(&config.channels));
    let backend = Arc::new(SystemBackend::new(config.audio.output_device.clone()));
    let registry = WorkerRegistry::new(
        Arc::new(config),
        volumes,
        backend,
        Arc::new(LoggingSink),
        settings,
        tokio::runtime::Handle::current(),
    );

    // Opening devices and joining groups blocks; keep it off the async workers.
    let results = tokio::task::block_in_place(|| registry.start_enabled());
    for (channel_id, result) in results {
        match result {
            Ok(worker) => tracing::info!("{}", worker.describe()),
            Err(e) => tracing::error!("Channel {} not started: {} [{}]", channel_id, e, e.kind()),
        }
    }
    tracing::info!("{} workers running, press Ctrl-C to stop", registry.count());

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let snapshot = registry.snapshot();
                tracing::info!("Workers: {}", serde_json::to_string(&snapshot)?);
            }
        }
    }

    tracing::info!("Shutting down...");
    registry.shutdown().await;
    Ok(())
}
