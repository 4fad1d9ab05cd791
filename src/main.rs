use axum::{Router, routing::get, Extension};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod admin;
mod config;
mod dispatch;
mod load_balancer;
mod metrics;
mod proxy;

use config::{BackendConfig, Transport};
use dispatch::{Handler, Pool};
use load_balancer::{is_valid_token, Balancer, StickyBalancer, WeightedRoundRobin};
use proxy::ProxyHandler;

fn handler_for(backend: &BackendConfig, timeout: Duration) -> anyhow::Result<Handler> {
    Ok(match backend.transport {
        Transport::Http => Handler::http(ProxyHandler::new(backend.url.clone(), timeout)),
        Transport::Tcp => Handler::Stream(backend.url.parse::<SocketAddr>()?),
    })
}

/// 按配置顺序注册后端；任何一个 id、地址或权重非法都会终止启动
fn register_backends(pool: &Pool, backends: &[BackendConfig], timeout: Duration) -> anyhow::Result<()> {
    for backend in backends {
        // id 会写入会话 cookie
        if !is_valid_token(&backend.id) {
            anyhow::bail!("backend id {:?} contains characters not allowed in a cookie value", backend.id);
        }
        let handler = handler_for(backend, timeout)?;
        pool.upsert(&backend.id, handler, backend.options())
            .map_err(|err| anyhow::anyhow!("backend {}: {}", backend.id, err))?;
        tracing::info!(
            backend = %backend.id,
            transport = ?backend.transport,
            weight = pool.weight_of(&backend.id).unwrap_or_default(),
            "registered backend"
        );
    }
    Ok(())
}

fn app(settings: &config::Settings, pool: Pool) -> Router {
    let mut app = Router::new()
        .route("/metrics", get(metrics::metrics_handler));

    if settings.admin_enabled() {
        app = app.merge(admin::router(settings.request_timeout()));
    }

    // 其余路径全部分发到后端
    let app = match &settings.sticky_cookie {
        Some(cookie_name) => {
            let sticky: dispatch::StickyPool =
                Arc::new(StickyBalancer::new(Arc::clone(&pool), cookie_name.clone()));
            tracing::debug!(cookie = sticky.cookie_name(), "sticky dispatch enabled");
            app.fallback(dispatch::sticky_dispatch).layer(Extension(sticky))
        }
        None => app.fallback(dispatch::wrr_dispatch),
    };

    app.layer(axum::middleware::from_fn(metrics::prometheus_middleware))
        .layer(Extension(pool))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", err);
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志：若无 RUST_LOG 则默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();
    // 加载环境配置
    let settings = config::load_settings()?;

    // 加载后端列表；文件缺失时以空池启动，可通过 admin 接口添加
    let backends = config::load_backends()?;
    let pool: Pool = Arc::new(WeightedRoundRobin::new());
    register_backends(&pool, &backends, settings.request_timeout())?;
    if pool.is_empty() {
        tracing::warn!("no backends registered, requests fail until one is added");
    }

    match &settings.sticky_cookie {
        Some(name) => tracing::info!("sticky sessions enabled, cookie {}", name),
        None => tracing::info!("sticky sessions disabled"),
    }

    let app = app(&settings, pool);

    let listener = TcpListener::bind(&settings.gateway_bind).await?;
    tracing::info!("🚀 Gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
