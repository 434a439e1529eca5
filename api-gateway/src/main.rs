use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use seat_booking::{
    Booking, Confirmation, EventId, FailureKind, KafkaTransport, Metrics, ServiceConfig,
    ShutdownCoordinator, Transport, TransportShutdown,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

mod service;

use service::GatewayService;

#[derive(Parser, Debug)]
#[command(name = "api-gateway")]
#[command(about = "HTTP gateway forwarding seat reservations to the booking service")]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value = "8080")]
    port: u16,

    /// Config file path
    #[arg(short = 'c', long = "config", default_value = "../client.properties")]
    config: PathBuf,

    /// Extra properties merged over the main config
    #[arg(long = "extra-config")]
    extra_config: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    service: GatewayService,
    metrics: Metrics,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReserveRequest {
    event_id: EventId,
    user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

type ApiResult = (StatusCode, Json<ApiResponse<Booking>>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    info!("Starting API Gateway on port {}", args.port);
    info!("Config file: {:?}", args.config);

    let config = load_config(&args)?;

    let kafka = KafkaTransport::connect(&config).context("failed to connect to Kafka")?;
    kafka
        .start_reply_listener()
        .context("failed to start reply listener")?;
    let transport: Arc<dyn Transport> = Arc::new(kafka);

    let metrics = Metrics::new().context("failed to create metrics registry")?;
    let state = AppState {
        service: GatewayService::new(Arc::clone(&transport), &config, metrics.clone()),
        metrics,
    };

    let coordinator = ShutdownCoordinator::default();
    coordinator
        .register_component(Box::new(TransportShutdown::new(transport)))
        .await;
    seat_booking::setup_signal_handlers(coordinator.clone());

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut shutdown = coordinator.subscribe();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;

    coordinator.shutdown().await?;
    served?;

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    let mut config = seat_booking::parse_properties_file(&args.config, "api-gateway")
        .with_context(|| format!("failed to load {:?}", args.config))?;

    if let Some(extra_config_path) = &args.extra_config {
        info!("Loading extra config from: {:?}", extra_config_path);
        config = seat_booking::merge_properties_file(config, extra_config_path)?;
    }

    Ok(seat_booking::apply_env_overrides(config)?)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/bookings/reserve", post(reserve_seat))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::NotFound => StatusCode::NOT_FOUND,
        FailureKind::Conflict => StatusCode::CONFLICT,
        FailureKind::Malformed => StatusCode::BAD_REQUEST,
        FailureKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn reserve_seat(
    State(state): State<AppState>,
    Json(request): Json<ReserveRequest>,
) -> ApiResult {
    if request.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("user_id must not be empty".to_string())),
        );
    }

    match state.service.reserve(request.event_id, &request.user_id).await {
        Ok(Confirmation::Booked(booking)) => (StatusCode::CREATED, Json(ApiResponse::success(booking))),
        Ok(Confirmation::PreviouslyBooked { event_id, user_id }) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: None,
                error: None,
                message: None,
            }
            .with_message(format!(
                "user {} already holds a seat for event {}",
                user_id, event_id
            ))),
        ),
        Err(failure) => {
            let kind = failure.kind();
            if kind.is_business() {
                warn!("Reservation for user {} on event {} rejected: {}", request.user_id, request.event_id, failure);
            } else {
                error!("Reservation for user {} on event {} failed: {}", request.user_id, request.event_id, failure);
            }
            (
                status_for(kind),
                Json(ApiResponse::error(failure.message).with_message(failure.code.as_str())),
            )
        }
    }
}

async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("API Gateway is healthy".to_string()))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.export().map_err(|e| {
        error!("Failed to export metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
