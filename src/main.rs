use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use telemetry_station::config::StationConfig;
use telemetry_station::export::{ExportFormat, Exporter};
use telemetry_station::ingest::IngestLoop;
use telemetry_station::live::{live_buffer, LiveView, SERIES_CAPACITY};
use telemetry_station::store::{PacketStore, ScalarField};
use telemetry_station::transport::{available_ports, open_serial};

/// CLI arguments for the telemetry station.
#[derive(Parser)]
#[command(name = "station", version, about = "Serial telemetry capture and persistence")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture from the serial port (the default when no command is given).
    Run,
    /// Export stored packets to a timestamped file.
    Export {
        /// Target format (csv or json)
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Newest rows to export; 0 exports everything
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },
    /// Show how much history is stored and the newest packet.
    Status,
    /// Delete every stored packet.
    Purge {
        /// Skip the confirmation message and delete immediately
        #[arg(long)]
        yes: bool,
    },
    /// List serial ports visible on this system.
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = StationConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_station(config).await,
        Commands::Export { format, limit } => run_export(config, format, limit).await,
        Commands::Status => run_status(config).await,
        Commands::Purge { yes } => run_purge(config, yes).await,
        Commands::Ports => {
            run_ports();
            Ok(())
        }
    }
}

/// Capture mode: serial reader, ingest loop, live view refresh, and
/// fire-and-forget persistence.
async fn run_station(config: StationConfig) -> Result<()> {
    info!(service = %config.service.name, "Starting telemetry station");

    if config.service.enable_metrics {
        init_metrics(config.service.metrics_port)?;
    }

    // The station keeps capturing without a database rather than refuse
    // to start; persistence resumes on the next launch.
    let store = match PacketStore::connect(&config.database).await {
        Ok(store) => {
            if config.database.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!(error = %e, "database unavailable, capturing live-only");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let (live_tx, mut live_rx) = live_buffer(config.ingest.queue_capacity);
    let ingest = Arc::new(IngestLoop::new(live_tx, store.clone(), shutdown.clone()));

    let stream = open_serial(&config.serial)
        .await
        .context("Failed to open serial port")?;
    let port_notice = format!(
        "[INFO] COM PORT opened: {} @ {} baud",
        config.serial.port, config.serial.baud
    );

    // Live view refresh cycle: drain the buffer on a short tick, log a
    // status summary on a longer one.
    let monitor = tokio::spawn({
        let shutdown = shutdown.clone();
        let stats = ingest.stats_handle();
        let store = store.clone();
        let refresh_interval = config.ingest.refresh_interval();
        let summary_interval = config.ingest.summary_interval();
        async move {
            let mut view = LiveView::default();

            if let Some(store) = &store {
                match store
                    .recent_series(ScalarField::AccelerationZ, SERIES_CAPACITY as i64)
                    .await
                {
                    Ok(series) => {
                        let samples = series.len();
                        view.seed_series(series.into_iter().map(|v| v as f32));
                        info!(samples, "live chart seeded from stored history");
                    }
                    Err(e) => warn!(error = %e, "could not seed live chart"),
                }
            }
            view.note(port_notice);

            let mut refresh = tokio::time::interval(refresh_interval);
            let mut summary = tokio::time::interval(summary_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = refresh.tick() => {
                        view.drain(&mut live_rx);
                    }
                    _ = summary.tick() => {
                        if let Some(packet) = view.last_packet() {
                            info!(
                                time = %packet.time,
                                latitude = packet.latitude,
                                longitude = packet.longitude,
                                satellites = packet.satellites,
                                "latest packet"
                            );
                        }
                        let stats = stats.read().clone();
                        info!(
                            lines_read = stats.lines_read,
                            packets_decoded = stats.packets_decoded,
                            decode_errors = stats.decode_errors,
                            read_errors = stats.read_errors,
                            persisted = stats.persisted,
                            persist_errors = stats.persist_errors,
                            chart_samples = view.series().len(),
                            "station status"
                        );
                    }
                }
            }
        }
    });

    let ingest_task = tokio::spawn({
        let ingest = Arc::clone(&ingest);
        async move {
            ingest.run(BufReader::new(stream)).await;
        }
    });

    info!("Telemetry station started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down telemetry station");
    shutdown.cancel();

    if let Err(e) = ingest_task.await {
        error!(error = %e, "Ingest task failed");
    }
    if let Err(e) = monitor.await {
        error!(error = %e, "Live view task failed");
    }

    info!("Telemetry station stopped");

    Ok(())
}

async fn run_export(config: StationConfig, format: ExportFormat, limit: i64) -> Result<()> {
    let store = Arc::new(
        PacketStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );

    let exporter = Exporter::new(store, &config.export);
    let path = exporter.export(format, limit).await.context("Export failed")?;

    println!("{}", path.display());
    Ok(())
}

async fn run_status(config: StationConfig) -> Result<()> {
    let store = PacketStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    let count = store.count().await?;
    println!("{count} packets stored");

    if let Some(packet) = store.latest().await? {
        println!(
            "latest: #{} {} Lat:{:.6} Lon:{:.6} Sat:{} AccZ:{:.2} ({})",
            packet.id,
            packet.time,
            packet.latitude,
            packet.longitude,
            packet.satellites,
            packet.acceleration_z,
            packet.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

async fn run_purge(config: StationConfig, yes: bool) -> Result<()> {
    let store = PacketStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    if !yes {
        let count = store.count().await?;
        println!("This permanently deletes {count} stored packets. Re-run with --yes to confirm.");
        return Ok(());
    }

    let deleted = store.delete_all().await?;
    println!("{deleted} packets deleted");
    Ok(())
}

fn run_ports() {
    let ports = available_ports();
    if ports.is_empty() {
        println!("no serial ports detected");
        return;
    }
    for port in ports {
        println!("{port}");
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
