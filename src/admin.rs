use std::time::Duration;

use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::dispatch::{Handler, Pool};
use crate::load_balancer::{is_valid_token, Balancer, BalancerError, EndpointOptions};
use crate::proxy::ProxyHandler;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),
    #[error("backend {0} is not registered, url is required")]
    MissingUrl(String),
    #[error("backend {0} is already registered, its url cannot be changed")]
    UrlChange(String),
    #[error("backend id {0:?} contains characters not allowed in a cookie value")]
    InvalidId(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::Balancer(BalancerError::NotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::Balancer(BalancerError::InvalidWeight(_)) => StatusCode::BAD_REQUEST,
            AdminError::MissingUrl(_) | AdminError::UrlChange(_) | AdminError::InvalidId(_) => {
                StatusCode::BAD_REQUEST
            }
            AdminError::Balancer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendView {
    pub id: String,
    pub weight: u32,
    pub transport: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeightView {
    pub id: String,
    pub weight: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpsertBody {
    pub url: Option<String>,
    pub weight: Option<i64>,
}

/// 运行期管理后端的接口
pub fn router(timeout: Duration) -> Router {
    Router::new()
        .route("/admin/backends", get(list_backends))
        .route(
            "/admin/backends/:id",
            get(backend_weight).put(upsert_backend).delete(remove_backend),
        )
        .layer(Extension(timeout))
}

async fn list_backends(Extension(pool): Extension<Pool>) -> Json<Vec<BackendView>> {
    let backends = pool
        .endpoints()
        .into_iter()
        .map(|e| BackendView {
            transport: e.handler.transport().to_string(),
            id: e.id,
            weight: e.weight,
        })
        .collect();
    Json(backends)
}

async fn backend_weight(
    Extension(pool): Extension<Pool>,
    Path(id): Path<String>,
) -> Result<Json<WeightView>, AdminError> {
    let weight = pool
        .weight_of(&id)
        .ok_or_else(|| BalancerError::NotFound(id.clone()))?;
    Ok(Json(WeightView { id, weight }))
}

async fn upsert_backend(
    Extension(pool): Extension<Pool>,
    Extension(timeout): Extension<Duration>,
    Path(id): Path<String>,
    Json(body): Json<UpsertBody>,
) -> Result<StatusCode, AdminError> {
    if !is_valid_token(&id) {
        return Err(AdminError::InvalidId(id));
    }
    // 已存在的节点只更新权重，handler 保持不变，换地址需要先删除
    let handler = match (body.url, pool.find_by_id(&id)) {
        (Some(_), Some(_)) => return Err(AdminError::UrlChange(id)),
        (Some(url), None) => Handler::http(ProxyHandler::new(url, timeout)),
        (None, Some((existing, _))) => existing.handler,
        (None, None) => return Err(AdminError::MissingUrl(id)),
    };
    pool.upsert(&id, handler, EndpointOptions { weight: body.weight })?;
    info!(backend = %id, weight = ?body.weight, "backend upserted via admin api");
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_backend(
    Extension(pool): Extension<Pool>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    pool.remove(&id)?;
    info!(backend = %id, "backend removed via admin api");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;
    use crate::load_balancer::WeightedRoundRobin;

    fn app() -> (Router, Pool) {
        let pool: Pool = Arc::new(WeightedRoundRobin::new());
        let app = router(Duration::from_secs(1)).layer(Extension(Arc::clone(&pool)));
        (app, pool)
    }

    fn request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_list_and_weight() {
        let (app, pool) = app();

        let response = app
            .clone()
            .oneshot(request("PUT", "/admin/backends/a", Some(r#"{"url":"http://127.0.0.1:30000","weight":3}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(pool.weight_of("a"), Some(3));

        // 只改权重
        let response = app
            .clone()
            .oneshot(request("PUT", "/admin/backends/a", Some(r#"{"weight":5}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(request("GET", "/admin/backends/a", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: WeightView = json_body(response).await;
        assert_eq!(view, WeightView { id: "a".to_string(), weight: 5 });

        let response = app.oneshot(request("GET", "/admin/backends", None)).await.unwrap();
        let list: Vec<BackendView> = json_body(response).await;
        assert_eq!(
            list,
            vec![BackendView { id: "a".to_string(), weight: 5, transport: "http".to_string() }]
        );
    }

    #[tokio::test]
    async fn test_upsert_errors() {
        let (app, pool) = app();

        let response = app
            .clone()
            .oneshot(request("PUT", "/admin/backends/a", Some(r#"{"weight":1}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request("PUT", "/admin/backends/a", Some(r#"{"url":"http://127.0.0.1:30000","weight":-1}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejects_cookie_unsafe_id() {
        let (app, pool) = app();
        for uri in ["/admin/backends/a%3Bb", "/admin/backends/a%20b", "/admin/backends/a%2Cb"] {
            let response = app
                .clone()
                .oneshot(request("PUT", uri, Some(r#"{"url":"http://127.0.0.1:30000","weight":1}"#)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_existing_with_url_is_rejected() {
        let (app, pool) = app();
        let body = r#"{"url":"http://127.0.0.1:30000","weight":1}"#;
        let response = app.clone().oneshot(request("PUT", "/admin/backends/a", Some(body))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("PUT", "/admin/backends/a", Some(r#"{"url":"http://127.0.0.1:30001","weight":4}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(pool.weight_of("a"), Some(1));
    }

    #[tokio::test]
    async fn test_remove() {
        let (app, pool) = app();
        pool.upsert("a", Handler::Stream("127.0.0.1:9000".parse().unwrap()), EndpointOptions::weight(1))
            .unwrap();

        let response = app.clone().oneshot(request("DELETE", "/admin/backends/a", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(pool.find_by_id("a").is_none());

        let response = app.clone().oneshot(request("DELETE", "/admin/backends/a", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(request("GET", "/admin/backends/a", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
