use crate::collectors::{
    config::CollectorConfig,
    database::MySqlConnector,
    registry::CollectorRegistry,
    util::{connect_options_from_dsn, redact_dsn},
};
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use secrecy::SecretString;
use serde_json::json;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info};
use ulid::Ulid;

pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
struct AppState {
    registry: Arc<CollectorRegistry>,
    telemetry_path: Arc<str>,
}

#[derive(Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Ulid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Start the exporter and serve until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if the DSN is invalid, metrics cannot be registered or the
/// listener cannot be bound.
pub async fn new(
    listen: &str,
    telemetry_path: &str,
    dsn: &SecretString,
    config: CollectorConfig,
) -> Result<()> {
    let options = connect_options_from_dsn(dsn)?;
    info!(dsn = %redact_dsn(dsn), prefix = %config.prefix, "using database");

    let config = Arc::new(config);
    let registry = CollectorRegistry::new(&config, Arc::new(MySqlConnector::new(options)))?;

    let app = router(Arc::new(registry), telemetry_path);

    let listener = bind(listen).await?;
    info!(
        address = %listener.local_addr()?,
        path = %telemetry_path,
        "listening for scrapes"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

/// HTTP routes: the telemetry path, `/health` and a landing page on `/`.
/// Routes that would collide with the telemetry path are left out.
pub fn router(registry: Arc<CollectorRegistry>, telemetry_path: &str) -> Router {
    let state = AppState {
        registry,
        telemetry_path: Arc::from(telemetry_path),
    };

    let mut app = Router::new().route(telemetry_path, get(metrics));

    if telemetry_path != HEALTH_PATH {
        app = app.route(HEALTH_PATH, get(health));
    }

    if telemetry_path != "/" {
        app = app.route("/", get(landing));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
    .with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.registry.collect_all().await {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    let path = &state.telemetry_path;
    Html(format!(
        "<html>\n<head><title>MoodleDB Exporter</title></head>\n<body>\n\
         <h1>MoodleDB Exporter</h1>\n<p><a href=\"{path}\">Metrics</a></p>\n</body>\n</html>\n"
    ))
}

/// Bind the listen address. `:port` means every interface, trying `[::]`
/// first (dual-stack where available) and then `0.0.0.0`.
///
/// # Errors
///
/// Returns an error if the address is malformed or cannot be bound.
pub async fn bind(listen: &str) -> Result<TcpListener> {
    if let Some(port) = listen.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in listen address '{listen}'"))?;

        match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(error = %e, "IPv6 bind failed, falling back to IPv4"),
        }

        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("failed to bind {listen}"));
    }

    TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
