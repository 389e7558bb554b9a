mod auth;
mod config;
mod cors;
mod db;
mod error;
mod metrics;
mod presence;
mod rooms;
mod store;
mod timeline;
mod validation;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::IdentityService;
use crate::config::{LogFormat, RelayConfig};
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::metrics::RelayMetrics;
use crate::presence::PresencePublisher;
use crate::rooms::RoomRouter;
use crate::store::TimelineStore;
use crate::timeline::TimelineEngine;
use crate::validation::MAX_REST_BODY_BYTES;

#[derive(Clone)]
struct HttpState {
    store: TimelineStore,
    metrics: Arc<RelayMetrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.identity_url.is_none() && config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set COWATCH_RELAY_JWT_SECRET in production");
    }

    let store = TimelineStore::connect(&config).await.context("failed to open timeline store")?;
    let (sessions, groups) = store
        .clear_ephemeral_state()
        .await
        .context("failed to clear timeline state from a previous run")?;
    info!(sessions, groups, backend = store.backend_name(), "cleared stale timeline state");

    let identity = IdentityService::from_config(&config).context("invalid identity configuration")?;
    let presence =
        PresencePublisher::from_config(config.event_bus_url.as_deref(), config.event_bus_timeout)
            .context("invalid event bus configuration")?;

    let metrics = Arc::new(RelayMetrics::default());
    metrics::set_global_metrics(Arc::clone(&metrics));

    let identity_backend = identity.backend_name();
    let engine = TimelineEngine::new(
        store.clone(),
        RoomRouter::default(),
        presence,
        config.chat_history_limit,
    );
    let app = build_router(
        HttpState { store, metrics },
        ws::WsState::new(engine, identity, &config),
        config.cors_origins.as_deref(),
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, identity = identity_backend, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn build_router(state: HttpState, ws_state: ws::WsState, cors_origins: Option<&str>) -> Router {
    let metrics = Arc::clone(&state.metrics);
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(render_metrics))
            .with_state(state)
            .merge(ws::router(ws_state)),
        metrics,
    )
    .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router, metrics: Arc<RelayMetrics>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz(State(state): State<HttpState>) -> (StatusCode, &'static str) {
    match state.store.check_health().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(error = ?error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

async fn render_metrics(State(state): State<HttpState>) -> Response {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<RelayMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
    metrics.record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}
