//! # Transport Surface
//!
//! axum router under `/v1` plus the context middleware that gives every
//! request an id (honoring an inbound `x-request-id`), a global deadline,
//! and a uniform error envelope. Dropping the handler future on deadline
//! expiry cancels any in-flight upstream calls for that request; the nonce
//! allocator alone runs detached so its row lock always completes.

use crate::config::ChainsRegistry;
use crate::handlers::{self, render_envelope, ApiError};
use crate::metrics::QuoterMetrics;
use crate::orchestrator::QuoteOrchestrator;
use crate::pairs::PairStore;
use crate::strategies::StrategyCatalog;
use crate::token_registry::TokenRegistry;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<QuoteOrchestrator>,
    pub chains: Arc<ChainsRegistry>,
    pub catalog: Arc<dyn StrategyCatalog>,
    pub pairs: Arc<dyn PairStore>,
    pub tokens: Arc<TokenRegistry>,
    pub global_timeout: Duration,
}

/// The request id minted or honored by the context middleware. Handlers can
/// extract it from request extensions for log correlation.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Build the full router: versioned API, metrics exposition, middleware.
pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/health", get(handlers::health))
        .route("/chains", get(handlers::list_chains))
        .route("/metadata", get(handlers::chain_metadata))
        .route("/price", post(handlers::price))
        .route("/quote", post(handlers::quote))
        .route("/quotes/:quote_id", get(handlers::quote_by_id))
        .route(
            "/admin/pairs",
            get(handlers::admin_list_pairs).post(handlers::admin_upsert_pair),
        )
        .route(
            "/admin/strategies",
            get(handlers::admin_list_strategies).post(handlers::admin_create_strategy),
        )
        .route(
            "/admin/strategies/:strategy_id/activate",
            post(handlers::admin_activate_strategy),
        )
        .route("/admin/config", put(handlers::admin_chain_config))
        .route("/admin/tokens", get(handlers::admin_list_tokens));

    Router::new()
        .nest("/v1", v1)
        .route("/metrics", get(handlers::metrics_exposition))
        .layer(middleware::from_fn_with_state(state.clone(), request_context))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Per-request context: id tagging, global deadline, envelope rendering and
/// request metrics.
async fn request_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let started = Instant::now();
    let response = match tokio::time::timeout(state.global_timeout, next.run(req)).await {
        Ok(response) => response,
        // the dropped future cancels outstanding upstream calls
        Err(_) => ApiError::new(
            crate::errors::ErrorCode::RequestTimeout,
            "request deadline exceeded",
        )
        .into_response(),
    };

    let mut response = finalize(response, &request_id, &path);
    QuoterMetrics::global()
        .http_request_duration_ms
        .with_label_values(&[path.as_str(), response.status().as_str()])
        .observe(started.elapsed().as_millis() as f64);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Turn an `ApiError` carried in response extensions into the final envelope.
fn finalize(response: Response, request_id: &str, path: &str) -> Response {
    if let Some(err) = response.extensions().get::<ApiError>().cloned() {
        QuoterMetrics::global()
            .requests_rejected
            .with_label_values(&[err.code.as_str()])
            .inc();
        return render_envelope(&err, request_id, path);
    }
    response
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(target: "server", %addr, "quote service listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
