use axum::{extract::Request, http::StatusCode, response::IntoResponse, Json, Router};
use serde_json::json;

/// 本地演示用的上游服务：每个响应都带 `server: <id>` 头，便于观察轮询与会话保持
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let id = std::env::var("DEMO_BACKEND_ID").unwrap_or_else(|_| "demo".to_string());
    let bind = std::env::var("DEMO_BACKEND_BIND").unwrap_or_else(|_| "0.0.0.0:30000".to_string());

    let app = Router::new().fallback(move |req: Request| {
        let id = id.clone();
        async move { echo(id, req) }
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Demo backend listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

fn echo(id: String, req: Request) -> impl IntoResponse {
    let body = Json(json!({
        "server": id,
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "message": format!("Served by {}", id),
    }));
    (StatusCode::OK, [("server", id)], body)
}
