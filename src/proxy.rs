use std::time::Duration;

use axum::{
    async_trait,
    body::{self, Body},
    extract::Request,
    http::{header, Response, StatusCode},
};
use reqwest::Client;
use tracing::{info, warn};

use crate::dispatch::HttpHandler;

/// 把请求转发到某个上游地址的 HTTP 后端
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    upstream: String,
    client: Client,
    timeout: Duration,
}

impl ProxyHandler {
    pub fn new(upstream: impl Into<String>, timeout: Duration) -> Self {
        Self {
            upstream: upstream.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    fn target(&self, req: &Request) -> String {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.upstream(), path)
    }
}

fn error_response(status: StatusCode, msg: String) -> Response<Body> {
    let mut response = Response::new(Body::from(msg));
    *response.status_mut() = status;
    response
}

#[async_trait]
impl HttpHandler for ProxyHandler {
    async fn serve(&self, req: Request) -> Response<Body> {
        let uri = self.target(&req);
        info!("Proxying request -> {}", uri);

        // 转发请求
        let mut rb = self
            .client
            .request(req.method().clone(), &uri)
            .timeout(self.timeout);

        // 转发头
        for (name, value) in req.headers().iter() {
            if name == &header::HOST {
                continue;
            }
            if let (Ok(n), Ok(v)) = (
                reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
                reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                rb = rb.header(n, v);
            }
        }

        // 转发 body
        let body_bytes = match body::to_bytes(req.into_body(), usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid body: {}", err));
            }
        };

        let upstream = match rb.body(body_bytes).send().await {
            Ok(r) => r,
            Err(err) => {
                warn!(upstream = %self.upstream(), error = %err, "upstream request failed");
                return error_response(StatusCode::BAD_GATEWAY, format!("Proxy error: {}", err));
            }
        };

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let bytes = upstream.bytes().await.unwrap_or_default();
        let mut builder = Response::builder().status(status.as_u16());

        // 透传上游响应头
        for (name, value) in headers.iter() {
            if let (Ok(n), Ok(v)) = (
                header::HeaderName::from_bytes(name.as_str().as_bytes()),
                header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                // 不设置 hop-by-hop 头
                if n != header::TRANSFER_ENCODING {
                    builder = builder.header(n, v);
                }
            }
        }

        // 如果上游没提供 Content-Type，兜底一个
        if !builder
            .headers_ref()
            .map(|h| h.contains_key(header::CONTENT_TYPE))
            .unwrap_or(false)
        {
            builder = builder.header(header::CONTENT_TYPE, "application/octet-stream");
        }

        builder
            .body(Body::from(bytes))
            .unwrap_or_else(|err| error_response(StatusCode::BAD_GATEWAY, format!("Proxy error: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_keeps_path_and_query() {
        let proxy = ProxyHandler::new("http://localhost:30000/", Duration::from_secs(1));
        assert_eq!(proxy.upstream(), "http://localhost:30000");

        let req = axum::http::Request::builder()
            .uri("/user/42?verbose=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(proxy.target(&req), "http://localhost:30000/user/42?verbose=1");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        // 端口 1 上通常没有服务
        let proxy = ProxyHandler::new("http://127.0.0.1:1", Duration::from_millis(500));
        let req = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = proxy.serve(req).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
