use axum::http::{header, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::debug;
use crate::load_balancer::{Balancer, BalancerError, Endpoint, EndpointOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend id {0:?} cannot be carried in a cookie")]
pub struct InvalidToken(pub String);

/// RFC 6265 cookie-octet：可见 ASCII，排除空白、`"`、`,`、`;`、`\`
pub fn is_valid_token(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E))
}

/// 会话保持：客户端通过 cookie 携带首次被分配到的节点 id，
/// 只要该节点仍在注册表中就一直路由到它，否则回退到内部均衡器
#[derive(Debug)]
pub struct StickyBalancer<B> {
    inner: B,
    cookie_name: String,
}

impl<B: Balancer> StickyBalancer<B> {
    pub fn new(inner: B, cookie_name: impl Into<String>) -> Self {
        Self {
            inner,
            cookie_name: cookie_name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// 解析亲和 token；无 token 或 token 已失效时回退到 next()。
    /// 命中 token 不会推进轮询游标。
    pub fn resolve(&self, token: Option<&str>) -> Result<Endpoint<B::Handler>, BalancerError> {
        if let Some((endpoint, _)) = token.and_then(|id| self.inner.find_by_id(id)) {
            debug!(backend = %endpoint.id, "sticky backend hit");
            return Ok(endpoint);
        }
        let endpoint = self.inner.next()?;
        debug!(backend = %endpoint.id, stale = token.is_some(), "backend selected");
        Ok(endpoint)
    }

    /// token 就是节点 id 本身，不做签名：撤销方式就是从注册表中删除节点
    pub fn issue_token(&self, id: &str) -> String {
        id.to_string()
    }

    /// 从请求头中读取亲和 cookie 的值
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim_matches('"').to_string())
    }

    /// 生成 Set-Cookie 头：`<name>=<id>; Path=/`。
    /// id 中出现 cookie 不允许的字符时拒绝，否则客户端回传的值会被截断
    pub fn sticky_cookie(&self, id: &str) -> Result<HeaderValue, InvalidToken> {
        let token = self.issue_token(id);
        if !is_valid_token(&token) {
            return Err(InvalidToken(token));
        }
        HeaderValue::from_str(&format!("{}={}; Path=/", self.cookie_name, token))
            .map_err(|_| InvalidToken(token))
    }
}

impl<B: Balancer> Balancer for StickyBalancer<B> {
    type Handler = B::Handler;

    fn find_by_id(&self, id: &str) -> Option<(Endpoint<Self::Handler>, usize)> {
        self.inner.find_by_id(id)
    }

    fn next(&self) -> Result<Endpoint<Self::Handler>, BalancerError> {
        self.inner.next()
    }

    fn upsert(
        &self,
        id: &str,
        handler: Self::Handler,
        options: EndpointOptions,
    ) -> Result<(), BalancerError> {
        self.inner.upsert(id, handler, options)
    }
}
