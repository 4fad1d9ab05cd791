use std::time::Instant;

use prometheus::{Encoder, TextEncoder, IntCounterVec, register_int_counter_vec, register_histogram_vec, HistogramVec};
use once_cell::sync::Lazy;
use axum::{extract::{MatchedPath, Request}, http::StatusCode, middleware::Next, response::IntoResponse};

pub static HTTP_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_requests_total",
        "Total HTTP requests handled",
        &["method", "path", "status"]
    )
    .unwrap()
});

pub static HTTP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Request duration histogram",
        &["method", "path"]
    )
    .unwrap()
});

/// 每个后端被分发到的次数；affinity 为 pinned（cookie 命中）或 selected（轮询选出）
/// 未命中任何路由（分发到后端）的请求统一使用的 path 标签
pub const FALLBACK_PATH_LABEL: &str = "fallback";

pub static BACKEND_SELECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_backend_selections_total",
        "Requests dispatched per backend",
        &["backend", "affinity"]
    )
    .unwrap()
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

// ===== Prometheus 中间件 =====
pub async fn prometheus_middleware(req: Request, next: Next) -> impl IntoResponse {
    let method = req.method().to_string();
    // 只用路由模板作标签，未匹配路由的请求归入 fallback
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| FALLBACK_PATH_LABEL.to_string());
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();

    if path != "/metrics" {
        HTTP_COUNTER.with_label_values(&[&method, &path, &status]).inc();
        HTTP_DURATION.with_label_values(&[&method, &path]).observe(start.elapsed().as_secs_f64());
    }

    response
}
