//! Thin HTTP adapter over [`FeedService`].
//!
//! Handlers validate query bounds, call the orchestrator, and translate
//! outcomes into responses; no feed logic lives here. Errors render as the
//! JSON envelope `{error, code, message, requestId, timestamp, path}`.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{etag, FeedContentType};
use crate::error::CoreError;
use crate::feed::FeedOptions;
use crate::orchestrator::FeedService;
use crate::util::normalize_page_url;

pub struct AppState {
    pub service: FeedService,
    started: tokio::time::Instant,
    request_counter: AtomicU64,
}

impl AppState {
    fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("req-{n:08x}")
    }
}

pub fn router(service: FeedService) -> Router {
    let state = Arc::new(AppState {
        service,
        started: tokio::time::Instant::now(),
        request_counter: AtomicU64::new(1),
    });

    Router::new()
        .route("/feed", get(feed))
        .route("/feed.atom", get(feed_atom))
        .route("/preview", get(preview))
        .route("/metadata", get(metadata))
        .route("/validate", post(validate))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(cache_clear))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct FeedParams {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    limit: Option<usize>,
}

impl FeedParams {
    fn split(self) -> Result<(String, FeedOptions), CoreError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidInput("missing required parameter: url".into()))?;
        let opts = FeedOptions {
            title: self.title,
            description: self.description,
            limit: self.limit,
        };
        opts.validate()?;
        Ok((url, opts))
    }
}

#[derive(Debug, Deserialize)]
struct PreviewParams {
    url: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UrlParam {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidateBody {
    url: String,
}

/// JSON error envelope shared by every endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: bool,
    code: &'static str,
    message: String,
    #[serde(rename = "requestId")]
    request_id: String,
    timestamp: String,
    path: String,
}

struct ApiError {
    core: CoreError,
    path: &'static str,
    request_id: String,
    production: bool,
}

impl ApiError {
    fn wrap(state: &AppState, path: &'static str, core: CoreError) -> Self {
        tracing::warn!(path = path, code = core.code(), error = %core, "Request failed");
        Self {
            core,
            path,
            request_id: state.next_request_id(),
            production: state.service.config().production,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.core.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Non-operational details stay inside the process in production
        let message = if self.production && !self.core.is_operational() {
            "internal server error".to_owned()
        } else {
            self.core.to_string()
        };

        let mut headers = HeaderMap::new();
        if let CoreError::OriginBlocked {
            retry_after_secs, ..
        } = &self.core
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }

        let body = ErrorBody {
            error: true,
            code: self.core.code(),
            message,
            request_id: self.request_id,
            timestamp: Utc::now().to_rfc3339(),
            path: self.path.to_owned(),
        };
        (status, headers, Json(body)).into_response()
    }
}

async fn feed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Result<Response, ApiError> {
    serve_feed(state, params, "/feed", None).await
}

/// Same bytes as `/feed`; only the content type differs. The RSS-in-Atom
/// mismatch is intentional, for readers that insist on an Atom endpoint.
async fn feed_atom(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Result<Response, ApiError> {
    serve_feed(state, params, "/feed.atom", Some(FeedContentType::Atom)).await
}

async fn serve_feed(
    state: Arc<AppState>,
    params: FeedParams,
    path: &'static str,
    content_type_override: Option<FeedContentType>,
) -> Result<Response, ApiError> {
    let (url, opts) = params.split().map_err(|e| ApiError::wrap(&state, path, e))?;

    let cached = state
        .service
        .feed(&url, opts.clone())
        .await
        .map_err(|e| ApiError::wrap(&state, path, e))?;

    let normalized =
        normalize_page_url(&url).map_err(|e| ApiError::wrap(&state, path, e.into()))?;
    let content_type = content_type_override.unwrap_or(cached.content_type);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type.as_str()),
    );
    let max_age = state.service.config().cache_duration_secs;
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    let last_modified = cached.built_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag(&normalized, &opts))) {
        headers.insert(header::ETAG, value);
    }

    Ok((headers, cached.bytes.to_vec()).into_response())
}

#[derive(Serialize)]
struct PreviewResponse {
    articles: Vec<crate::feed::Article>,
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| {
            ApiError::wrap(
                &state,
                "/preview",
                CoreError::InvalidInput("missing required parameter: url".into()),
            )
        })?;

    let articles = state
        .service
        .preview(&url, params.limit, params.page.unwrap_or(0))
        .await
        .map_err(|e| ApiError::wrap(&state, "/preview", e))?;

    Ok(Json(PreviewResponse { articles }))
}

async fn metadata(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UrlParam>,
) -> Result<Response, ApiError> {
    let url = params.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
        ApiError::wrap(
            &state,
            "/metadata",
            CoreError::InvalidInput("missing required parameter: url".into()),
        )
    })?;

    let report = state
        .service
        .metadata(&url)
        .await
        .map_err(|e| ApiError::wrap(&state, "/metadata", e))?;
    Ok(Json(report).into_response())
}

async fn validate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateBody>,
) -> Result<Response, ApiError> {
    let report = state
        .service
        .validate_target(&body.url)
        .await
        .map_err(|e| ApiError::wrap(&state, "/validate", e))?;
    Ok(Json(report).into_response())
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.stats_snapshot()).into_response()
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
    removed: usize,
}

async fn cache_clear(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UrlParam>,
) -> Result<Json<ClearResponse>, ApiError> {
    let removed = state
        .service
        .clear_cache(params.url.as_deref())
        .map_err(|e| ApiError::wrap(&state, "/cache", e))?;
    Ok(Json(ClearResponse {
        cleared: true,
        removed,
    }))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    #[serde(rename = "uptimeSecs")]
    uptime_secs: u64,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_params_require_url() {
        let params = FeedParams {
            url: None,
            title: None,
            description: None,
            limit: None,
        };
        assert!(matches!(
            params.split(),
            Err(CoreError::InvalidInput(_))
        ));

        let params = FeedParams {
            url: Some("  ".into()),
            title: None,
            description: None,
            limit: None,
        };
        assert!(params.split().is_err());
    }

    #[test]
    fn test_feed_params_enforce_option_bounds() {
        let params = FeedParams {
            url: Some("https://example.com".into()),
            title: None,
            description: None,
            limit: Some(0),
        };
        assert!(params.split().is_err());

        let params = FeedParams {
            url: Some("https://example.com".into()),
            title: Some("ok".into()),
            description: None,
            limit: Some(10),
        };
        let (url, opts) = params.split().unwrap();
        assert_eq!(url, "https://example.com");
        assert_eq!(opts.limit, Some(10));
    }
}
