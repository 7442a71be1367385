use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::exchange::{redact, SecretExchange, SecretRecord, StatsSnapshot};
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Application state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub exchange: SecretExchange,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Answer to a successful store
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    pub mnemo: String,
}

/// Store an encrypted secret and answer with its mnemonic
pub async fn store_secret(
    State(state): State<AppState>,
    payload: Result<Json<SecretRecord>, JsonRejection>,
) -> AppResult<Json<StoreResponse>> {
    let Json(record) = payload.map_err(|e| {
        debug!("Rejected store request: {}", e);
        AppError::InvalidPayload
    })?;
    if !record.is_complete() {
        debug!("Rejected store request with empty fields");
        return Err(AppError::InvalidPayload);
    }

    let mnemonic = state.exchange.allocate(&record).await.map_err(|e| {
        error!("Could not store secret: {}", e);
        AppError::StoreFailed
    })?;

    Ok(Json(StoreResponse {
        mnemo: mnemonic.into_string(),
    }))
}

/// Hand out a secret once; it is gone afterwards
pub async fn retrieve_secret(
    State(state): State<AppState>,
    Path(mnemo): Path<String>,
) -> AppResult<impl IntoResponse> {
    match state.exchange.exchange(&mnemo).await {
        Ok(Some(record)) => Ok(([(header::CACHE_CONTROL, "no-store")], Json(record))),
        Ok(None) => Err(AppError::NotFound),
        Err(e) => {
            error!("Could not read secret {}…: {}", redact(&mnemo), e);
            Err(AppError::RetrieveFailed)
        }
    }
}

/// Stored and retrieved counters
pub async fn stats(State(state): State<AppState>) -> AppResult<Json<StatsSnapshot>> {
    let snapshot = state.exchange.stats().snapshot().await.map_err(|e| {
        error!("Could not read counters: {}", e);
        AppError::from(e)
    })?;
    Ok(Json(snapshot))
}

/// Origins from the configuration. `None` when `*` allows every origin.
fn allowed_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    if origins.iter().any(|o| o.trim() == "*") {
        return None;
    }

    let allowed = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    Some(allowed)
}

/// CORS for the API
fn cors_layer(allowed: Option<&[HeaderValue]>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    match allowed {
        None => cors.allow_origin(Any),
        Some(list) => cors.allow_origin(AllowOrigin::list(list.iter().cloned())),
    }
}

#[derive(Clone)]
struct AllowedOrigins(Arc<Vec<HeaderValue>>);

/// Answer preflights from origins outside the configured list with 403
async fn reject_foreign_preflight(
    State(allowed): State<AllowedOrigins>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let is_preflight = request.method() == Method::OPTIONS
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    if is_preflight {
        if let Some(origin) = headers.get(header::ORIGIN) {
            if !allowed.0.contains(origin) {
                warn!("Refusing CORS preflight from {:?}", origin);
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }
    next.run(request).await
}

/// Store page at `/`, retrieve page at `/r`, everything else from `dir`
fn static_site(dir: &str) -> Router {
    let dir = FsPath::new(dir);
    Router::new()
        .route_service("/r", ServeFile::new(dir.join("retrieve.html")))
        .route_service("/imprint", ServeFile::new(dir.join("imprint.html")))
        .fallback_service(ServeDir::new(dir))
}

/// Create the web router
pub fn create_router(state: AppState, config: &AppConfig) -> Router {
    let allowed = allowed_origins(&config.cors_origins);

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/secret", post(store_secret))
        .route("/api/secret/{mnemo}", get(retrieve_secret))
        .route("/api/stats", get(stats))
        .with_state(state)
        .merge(static_site(&config.web.static_dir))
        .layer(cors_layer(allowed.as_deref()));

    // Outside the CORS layer, so foreign preflights never reach it
    let router = match allowed {
        Some(list) => router.layer(middleware::from_fn_with_state(
            AllowedOrigins(Arc::new(list)),
            reject_foreign_preflight,
        )),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
