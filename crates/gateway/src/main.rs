//! QAForge API Gateway
//!
//! The HTTP entry point of the question answering service.
//! Handles:
//! - Question answering (single-turn, multi-turn, streaming)
//! - Rate limiting
//! - Health and readiness probes
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use qaforge_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics::{self, COMPLETION_BUCKETS, LATENCY_BUCKETS, METRICS_PREFIX},
    ResolutionEngine,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: ResolutionEngine,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting QAForge API Gateway v{}",
        qaforge_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    // Wire the resolution engine
    let engine = ResolutionEngine::from_config(&config)
        .await
        .context("Failed to initialise resolution engine")?;

    match engine.completion().ping().await {
        Ok(()) => info!(model = engine.completion().model_name(), "Completion provider reachable"),
        Err(e) => warn!(error = %e, "Completion provider self-test failed, answers may degrade"),
    }

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        engine,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight requests get `shutdown_timeout_secs` to drain
    let drain_timeout = config.shutdown_timeout();
    let (draining_tx, mut draining_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = draining_tx.send(true);
        })
        .into_future();
    let drain_deadline = async move {
        let _ = draining_rx.wait_for(|draining| *draining).await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => warn!(
            timeout_secs = drain_timeout.as_secs(),
            "Graceful shutdown timed out, dropping remaining connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_resolution_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_completion_duration_seconds", METRICS_PREFIX)),
            COMPLETION_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let qa_routes = Router::new()
        .route("/ask", post(handlers::qa::ask))
        .route("/message", post(handlers::qa::message))
        .route("/ask/stream", post(handlers::qa::ask_stream));

    let mut app = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/qa", qa_routes)
        .route_layer(from_fn(middleware::metrics::track_requests));

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = create_rate_limiter(rate_limit.requests_per_second, rate_limit.burst);
        let limit = rate_limit.requests_per_second;
        app = app.layer(from_fn(move |request, next| {
            rate_limit_middleware(request, next, limiter.clone(), limit)
        }));
    }

    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    // Compose the app
    app.layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Outermost runs first: set the id, then propagate it to the response
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
