pub mod channels; // Inter-component communication channels
pub mod config; // Configuration management
pub mod control; // Control word and power reference encoding
pub mod coordinator; // Poll loop orchestration
pub mod datalog_writer; // Rate-limited CSV data logging
pub mod error; // Error handling and types
pub mod events; // Append-only event journal
pub mod monitor; // Telemetry reader
pub mod options; // Command line options parsing
pub mod prelude; // Common imports and types
pub mod register; // Register decoding and the device data model
pub mod transport; // Register transport seam

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::datalog_writer::DataLogger;
use crate::events::{EventJournal, EventKind};
use crate::monitor::Monitor;
use crate::prelude::*;
use crate::transport::{RegisterTransport, TcpTransport};
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a worker to exit after it has been told to stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Main application entry point: wires up the transport, the poll loop
/// and the persistence workers, then runs until the shutdown signal.
pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: Arc<ConfigWrapper>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Err(e) =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {} {}] {}",
                    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                    record.level(),
                    record.module_path().unwrap_or(""),
                    record.args()
                )
            })
            .write_style(env_logger::WriteStyle::Never)
            .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("inverter-monitor {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();

    let inverter = config.inverter();
    let transport: Arc<dyn RegisterTransport> = Arc::new(
        TcpTransport::connect(inverter.host(), inverter.port(), inverter.unit_id()).await?,
    );

    let journal = EventJournal::new(&config.events().directory())?;
    let datalog = DataLogger::new((*config).clone(), channels.clone());
    let monitor = Monitor::new(transport.clone(), inverter.register_base());
    let coordinator = Coordinator::new(
        (*config).clone(),
        channels.clone(),
        monitor,
        datalog.clone(),
        journal.clone(),
    );

    let datalog_clone = datalog.clone();
    let datalog_handle = tokio::spawn(async move {
        if let Err(e) = datalog_clone.start().await {
            error!("datalog writer task failed: {}", e);
        }
    });

    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("coordinator task failed: {}", e);
        }
    });

    journal.record(EventKind::System, "monitor started", None);

    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received, stopping components...");

    coordinator.stop();
    datalog.stop();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, coordinator_handle)
        .await
        .is_err()
    {
        warn!("coordinator did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, datalog_handle)
        .await
        .is_err()
    {
        warn!("datalog writer did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    // The file must be released even if the worker had to be abandoned.
    datalog.close();

    journal.record(EventKind::System, "monitor stopped", None);
    info!("shutdown complete");

    Ok(())
}

/// Library entry point for embedders: installs the ctrl-c handler and
/// runs [`app`] to completion.
pub async fn run(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let config = Arc::new(ConfigWrapper::from_config(config));

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    app(shutdown_rx, config)
        .await
        .map_err(|e| anyhow!("{}", e))?;

    Ok(())
}
