use axum::{
    body::StreamBody,
    extract::{ConnectInfo, Path, Query, State},
    http::{
        header::{
            AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
            LAST_MODIFIED,
        },
        HeaderMap, HeaderValue, Request, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::app::ports::{ObjectInfo, ObjectStorePort};
use crate::app::{LatestCache, UpstreamFetcher, UrlUploader};
use crate::constants::{CACHE_CONTROL_VALUE, SHUTDOWN_GRACE_SECS};
use crate::domain::issue::storage_key_for_public_path;
use crate::error::MirrorError;
use crate::observability::metrics;
use crate::rate_limiter::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStorePort>,
    pub fetcher: Arc<UpstreamFetcher>,
    pub latest: LatestCache,
    pub redirect_to_latest: bool,
    pub uploader: Arc<UrlUploader>,
    /// `/api/update` is only routed when set.
    pub update_auth_key: Option<String>,
    /// `/api/upload` is only routed when set.
    pub upload_auth_key: Option<String>,
    pub metrics: Option<PrometheusHandle>,
    pub limiter: Arc<RateLimiter>,
    pub shutdown: CancellationToken,
}

async fn ping() -> &'static str {
    "."
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn index(State(state): State<AppState>) -> Response {
    match state.latest.load() {
        Some(issue) if state.redirect_to_latest => {
            Redirect::temporary(&format!("/{}", issue.public_name())).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn authorized(key: Option<&str>, headers: &HeaderMap) -> bool {
    let given = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    matches!((key, given), (Some(key), Some(given)) if key == given)
}

/// Forced refresh, then a redirect to whatever issue is now current.
async fn update_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(state.update_auth_key.as_deref(), &headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    info!("Update requested");
    match state.fetcher.fetch(true, &state.shutdown.child_token()).await {
        Ok(issue) => Redirect::temporary(&format!("/{}", issue.public_name())).into_response(),
        Err(e) => {
            error!(error = %e, "Requested update failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Mirrors `?url=` into the bucket and answers with the path it is served under.
async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(state.upload_auth_key.as_deref(), &headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let Some(raw) = params.get("url").filter(|u| !u.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing url").into_response();
    };
    let url = match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => return (StatusCode::BAD_REQUEST, "Invalid url").into_response(),
    };

    match state.uploader.upload(&url, &state.shutdown.child_token()).await {
        Ok(uploaded) => format!("/{}\n", uploaded.public_name).into_response(),
        Err(e) => {
            error!(url = %url, error = %e, "Upload failed");
            let status = match &e {
                MirrorError::Upstream { status } => StatusCode::from_u16(*status)
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string()).into_response()
        }
    }
}

async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let key = storage_key_for_public_path(&name);
    let object = match state.store.get(&key).await {
        Ok(object) => object,
        Err(e) if e.is_not_found() => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(key, error = %e, "Failed to read object");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let etag = object.info.e_tag.as_deref().map(quote_etag);
    let mut response_headers = object_headers(&object.info, etag.as_deref());
    let not_modified = match (etag.as_deref(), headers.get(IF_NONE_MATCH)) {
        (Some(etag), Some(given)) => given
            .to_str()
            .map(|given| given.split(',').any(|t| t.trim() == etag || t.trim() == "*"))
            .unwrap_or(false),
        _ => false,
    };
    if not_modified {
        response_headers.remove(CONTENT_LENGTH);
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }

    (response_headers, StreamBody::new(object.body)).into_response()
}

fn quote_etag(tag: &str) -> String {
    if tag.starts_with('"') || tag.starts_with("W/") {
        tag.to_string()
    } else {
        format!("\"{tag}\"")
    }
}

fn object_headers(info: &ObjectInfo, etag: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let content_type = info.content_type.as_deref().unwrap_or("application/octet-stream");
    let last_modified = info.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    let values = [
        (CONTENT_TYPE, Some(content_type.to_string())),
        (CONTENT_LENGTH, Some(info.size.to_string())),
        (ETAG, etag.map(str::to_string)),
        (LAST_MODIFIED, Some(last_modified)),
        (CACHE_CONTROL, Some(CACHE_CONTROL_VALUE.to_string())),
    ];
    for (name, value) in values {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Proxy headers first, then the peer address.
fn client_ip<B>(req: &Request<B>) -> IpAddr {
    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    header_ip("x-real-ip")
        .or_else(|| header_ip("x-forwarded-for"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn rate_limit<B>(State(state): State<AppState>, req: Request<B>, next: Next<B>) -> Response {
    if req.uri().path() != "/ping" {
        let ip = client_ip(&req);
        if !state.limiter.try_acquire(ip) {
            warn!(client = %ip, "Rate limit exceeded");
            metrics::http::rate_limited();
            return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        }
    }
    next.run(req).await
}

pub fn create_server(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ping", get(ping))
        .route("/metrics", get(metrics_handler));
    if state.update_auth_key.is_some() {
        router = router.route("/api/update", get(update_handler));
    }
    if state.upload_auth_key.is_some() {
        router = router.route("/api/upload", get(upload_handler).post(upload_handler));
    }

    router
        .route("/", get(index))
        .route("/*name", get(download))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until the state's shutdown token fires, then drains open
/// connections for a bounded grace period.
pub async fn start_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_server(state);

    let server = Server::try_bind(&addr)?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });
    info!(address = %addr, "HTTP server listening");

    let grace = async {
        shutdown.cancelled().await;
        tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
    };
    tokio::select! {
        res = server => res?,
        _ = grace => warn!("Shutdown grace period elapsed, closing open connections"),
    }
    info!("HTTP server stopped");
    Ok(())
}
