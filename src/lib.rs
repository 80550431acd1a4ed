//! Core library for the echo bot. This module wires the adapter, the
//! handler table and the HTTP routes together.
//!
//! Every request to `/api/messages` ends in exactly one response: 400 when
//! the request cannot be parsed into an activity, 200 otherwise, including
//! when dispatch or reply delivery fails. Failing the channel's request would
//! only make it retry a turn that may already have been partially handled.

pub mod activity;
pub mod adapter;
mod config;
pub mod connector;
pub mod error;
pub mod handlers;

pub use activity::{Activity, ActivityType, ResourceResponse};
pub use adapter::{Adapter, AdapterSettings, BotAdapter};
pub use config::{redact, AppConfig, DEFAULT_PORT};
pub use connector::{ActivitySender, ConnectorClient};
pub use error::BotError;
pub use handlers::{ActivityHandler, HandlerSet, TurnContext};

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody},
    ConnectInfo, DefaultBodyLimit, State,
};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Request outcome counters exposed on `/metrics`.
#[derive(Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub parse_failures_total: AtomicU64,
    pub unhandled_total: AtomicU64,
    pub dispatched_total: AtomicU64,
    /// Dispatch failures acknowledged to the channel with 200.
    pub dispatch_failures_total: AtomicU64,
    pub preflight_total: AtomicU64,
}

/// Shared application state. Everything here is immutable after startup
/// apart from the metric counters.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<dyn Adapter>,
    pub handlers: Arc<HandlerSet>,
    pub metrics: Arc<Metrics>,
    pub cors_preflight: bool,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub process_start_instant: Instant,
}

impl AppState {
    pub fn new(adapter: Arc<dyn Adapter>, handlers: HandlerSet) -> Self {
        Self {
            adapter,
            handlers: Arc::new(handlers),
            metrics: Arc::new(Metrics::default()),
            cors_preflight: false,
            max_request_bytes: None,
            process_start_instant: Instant::now(),
        }
    }

    pub fn with_cors_preflight(mut self, enabled: bool) -> Self {
        self.cors_preflight = enabled;
        self
    }

    pub fn with_max_request_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_request_bytes = limit;
        self
    }
}

/// Build state from a loaded configuration. Fails only when the adapter
/// cannot be constructed.
pub fn build_state(config: &AppConfig) -> Result<AppState, BotError> {
    let adapter = BotAdapter::new(
        config.adapter_settings(),
        Duration::from_millis(config.send_timeout_ms),
    )?
    .with_turn_error_text(config.turn_error_text.clone());
    let handlers = HandlerSet::echo(config.welcome_text.clone());
    tracing::info!(
        handlers = handlers.len(),
        cors_preflight = config.cors_preflight,
        "adapter ready"
    );
    Ok(AppState::new(Arc::new(adapter), handlers)
        .with_cors_preflight(config.cors_preflight)
        .with_max_request_bytes(config.max_request_bytes))
}

/// Build state from environment variables. See [`AppConfig::from_env`] for
/// the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    Ok(build_state(&config)?)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let messages = if state.cors_preflight {
        post(messages_handler).options(preflight_handler)
    } else {
        post(messages_handler)
    };

    let router = Router::new()
        .route("/api/messages", messages)
        .route("/api/ping", any(ping_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = state.max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn remote_addr(connect: Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Handler for `/api/messages`. Parses the activity, acknowledges types
/// with no registered handler and dispatches the rest.
async fn messages_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> axum::response::Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        remote = %remote_addr(connect),
        method = %method,
        authorization_present = headers.contains_key(header::AUTHORIZATION),
        "received activity request"
    );

    let body = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return handle_body_rejection(&state, rejection),
    };

    let activity = match state.adapter.parse_request(&headers, &body).await {
        Ok(activity) => activity,
        Err(err) => {
            state
                .metrics
                .parse_failures_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "failed to parse request");
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };
    tracing::info!(
        activity_type = %activity.kind,
        service_url = activity.service_url.as_deref().unwrap_or(""),
        "parsed activity"
    );

    if !state.handlers.handles(&activity.kind) {
        state.metrics.unhandled_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(activity_type = %activity.kind, "no handler for activity type; acknowledged");
        return StatusCode::OK.into_response();
    }

    state.metrics.dispatched_total.fetch_add(1, Ordering::Relaxed);
    match state.adapter.process_activity(activity, &state.handlers).await {
        Ok(()) => tracing::info!("request processed successfully"),
        Err(err) => {
            state
                .metrics
                .dispatch_failures_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                error = %err,
                swallowed = true,
                "failed to process activity; acknowledging to avoid channel retries"
            );
        }
    }
    StatusCode::OK.into_response()
}

fn handle_body_rejection(state: &AppState, rejection: BytesRejection) -> axum::response::Response {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            let message = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            (StatusCode::PAYLOAD_TOO_LARGE, message).into_response()
        }
        other => {
            state
                .metrics
                .parse_failures_total
                .fetch_add(1, Ordering::Relaxed);
            let message = other.body_text();
            tracing::warn!(error = %message, "failed to read request body");
            (StatusCode::BAD_REQUEST, message).into_response()
        }
    }
}

/// CORS preflight for browser-hosted clients. Never parses or dispatches.
async fn preflight_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> axum::response::Response {
    state.metrics.preflight_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        remote = %remote_addr(connect),
        method = "OPTIONS",
        authorization_present = headers.contains_key(header::AUTHORIZATION),
        "answered CORS preflight"
    );
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type, Authorization"),
            ),
        ],
    )
        .into_response()
}

/// Liveness probe; independent of adapter state.
async fn ping_handler() -> &'static str {
    "pong"
}

/// Prometheus-style metrics exposition. Text format with simple counters.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    let mut buf = String::new();
    use std::fmt::Write as _;
    let m = &state.metrics;
    let counters = [
        (
            "bot_requests_total",
            "Requests received on /api/messages",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "bot_parse_failures_total",
            "Requests rejected with 400 because no activity could be parsed",
            m.parse_failures_total.load(Ordering::Relaxed),
        ),
        (
            "bot_unhandled_total",
            "Activities acknowledged without dispatch (no registered handler)",
            m.unhandled_total.load(Ordering::Relaxed),
        ),
        (
            "bot_dispatched_total",
            "Activities dispatched to a handler",
            m.dispatched_total.load(Ordering::Relaxed),
        ),
        (
            "bot_dispatch_failures_total",
            "Dispatch failures acknowledged to the channel with 200",
            m.dispatch_failures_total.load(Ordering::Relaxed),
        ),
        (
            "bot_preflight_total",
            "CORS preflight requests answered",
            m.preflight_total.load(Ordering::Relaxed),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }
    writeln!(
        &mut buf,
        "# HELP bot_build_info Build information\n# TYPE bot_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "bot_build_info{{version=\"{}\",handlers=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION"),
        state.handlers.len()
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP bot_process_uptime_seconds Process uptime seconds\n# TYPE bot_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "bot_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
