use std::fmt;
#[cfg(test)]
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::Request,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use thiserror::Error;
use tracing::warn;

use crate::load_balancer::{Balancer, BalancerError, Endpoint, InvalidToken, StickyBalancer, WeightedRoundRobin};
use crate::metrics::BACKEND_SELECTIONS;

/// 可处理 HTTP 请求的后端能力
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    async fn serve(&self, req: Request) -> Response;
}

/// 把异步闭包包装成 HttpHandler
#[cfg(test)]
pub struct HandlerFn<F>(pub F);

#[cfg(test)]
#[async_trait]
impl<F, Fut> HttpHandler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn serve(&self, req: Request) -> Response {
        (self.0)(req).await
    }
}

/// 节点的传输能力。同一个池里可以混合注册多种传输，
/// 只有 `Http` 能被 HTTP 分发使用
#[derive(Clone)]
pub enum Handler {
    Http(Arc<dyn HttpHandler>),
    Stream(SocketAddr),
}

impl Handler {
    pub fn http(handler: impl HttpHandler) -> Self {
        Handler::Http(Arc::new(handler))
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Handler::Http(_) => "http",
            Handler::Stream(_) => "tcp",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Http(_) => f.write_str("Handler::Http(..)"),
            Handler::Stream(addr) => f.debug_tuple("Handler::Stream").field(addr).finish(),
        }
    }
}

pub type Pool = Arc<WeightedRoundRobin<Handler>>;
pub type StickyPool = Arc<StickyBalancer<Pool>>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Selection(#[from] BalancerError),
    #[error("backend {0} cannot serve http requests")]
    CapabilityMismatch(String),
    #[error(transparent)]
    InvalidToken(#[from] InvalidToken),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        warn!(error = %self, "dispatch failed");
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let reason = status.canonical_reason().unwrap_or_default();
        let body = match self {
            DispatchError::Selection(err) => format!("{}: {}", reason, err),
            _ => reason.to_string(),
        };
        (status, body).into_response()
    }
}

fn http_capability(endpoint: &Endpoint<Handler>) -> Result<Arc<dyn HttpHandler>, DispatchError> {
    match &endpoint.handler {
        Handler::Http(handler) => Ok(Arc::clone(handler)),
        Handler::Stream(_) => Err(DispatchError::CapabilityMismatch(endpoint.id.clone())),
    }
}

/// 纯加权轮询分发，不写 cookie
pub async fn wrr_dispatch(
    Extension(pool): Extension<Pool>,
    req: Request,
) -> Result<Response, DispatchError> {
    let endpoint = pool.next()?;
    let handler = http_capability(&endpoint)?;
    BACKEND_SELECTIONS.with_label_values(&[endpoint.id.as_str(), "selected"]).inc();
    Ok(handler.serve(req).await)
}

/// 会话保持分发：按 cookie 解析节点，响应里刷新 cookie
pub async fn sticky_dispatch(
    Extension(lb): Extension<StickyPool>,
    req: Request,
) -> Result<Response, DispatchError> {
    let token = lb.token_from_headers(req.headers());
    let endpoint = lb.resolve(token.as_deref())?;
    let handler = http_capability(&endpoint)?;
    let cookie = lb.sticky_cookie(&endpoint.id)?;

    let affinity = if token.as_deref() == Some(endpoint.id.as_str()) {
        "pinned"
    } else {
        "selected"
    };
    BACKEND_SELECTIONS.with_label_values(&[endpoint.id.as_str(), affinity]).inc();

    let mut response = handler.serve(req).await;
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}
