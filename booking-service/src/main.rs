use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use seat_booking::{Metrics, ServiceConfig};
use std::{net::SocketAddr, path::PathBuf};
use tracing::{error, info};

mod service;

use service::BookingService;

#[derive(Parser, Debug)]
#[command(name = "booking-service")]
#[command(about = "Seat reservation service: answers booking.reserve requests")]
struct Args {
    /// State directory for storage
    #[arg(short = 'd', long = "state-dir", default_value = "/tmp/seat-booking")]
    state_dir: PathBuf,

    /// Config file path
    #[arg(short = 'c', long = "config", default_value = "../client.properties")]
    config: PathBuf,

    /// Extra properties merged over the main config
    #[arg(long = "extra-config")]
    extra_config: Option<PathBuf>,

    /// JSON file with events to load before serving
    #[arg(long = "seed-events")]
    seed_events: Option<PathBuf>,

    /// Serve Prometheus metrics on this port
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    info!("Starting Booking Service");
    info!("State directory: {:?}", args.state_dir);
    info!("Config file: {:?}", args.config);

    let config = load_config(&args)?;

    let service = BookingService::new(config)
        .await
        .context("failed to initialise booking service")?;

    if let Some(path) = &args.seed_events {
        let seeded = service
            .seed_events(path)
            .await
            .with_context(|| format!("failed to seed events from {:?}", path))?;
        info!("Seeded {} events", seeded);
    }

    if let Some(port) = args.metrics_port {
        spawn_metrics_server(port, service.metrics());
    }

    info!("Booking Service started successfully");
    service.run().await?;

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    let mut config = seat_booking::parse_properties_file(&args.config, "booking-service")
        .with_context(|| format!("failed to load {:?}", args.config))?;
    config.state_dir = args.state_dir.to_string_lossy().to_string();

    if let Some(extra_config_path) = &args.extra_config {
        info!("Loading extra config from: {:?}", extra_config_path);
        config = seat_booking::merge_properties_file(config, extra_config_path)?;
    }

    Ok(seat_booking::apply_env_overrides(config)?)
}

fn spawn_metrics_server(port: u16, metrics: Metrics) {
    let app = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(metrics);

    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!("Metrics listening on {}", addr);
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    error!("Metrics server failed: {}", e);
                }
            }
            Err(e) => error!("Failed to bind metrics port {}: {}", port, e),
        }
    });
}

async fn metrics_endpoint(State(metrics): State<Metrics>) -> Result<String, StatusCode> {
    metrics.export().map_err(|e| {
        error!("Failed to export metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
