//! Transport assembly: stdio serving and the HTTP router combining the
//! interaction surface, the SSE endpoint and the streamable MCP endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;

use crate::connector::manager::Manager;
use crate::server::McpServer;
use crate::ui;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Serve the MCP protocol over stdio until the client disconnects.
pub async fn serve_stdio(server: McpServer) -> Result<()> {
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

/// Require a bearer token on the MCP endpoint when an OAuth2 policy is
/// configured. `/sse` and `/ui/*` stay unauthenticated by design.
#[derive(Clone)]
struct AuthGate {
    required: bool,
}

async fn bearer_gate(
    State(gate): State<AuthGate>,
    req: Request<Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if !gate.required {
        return Ok(next.run(req).await);
    }
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer "));
    if authorized {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Accept `:5000` style addresses by defaulting the host.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Serve the HTTP transport until `shutdown` fires.
pub async fn serve_http(
    server: McpServer,
    manager: Arc<Manager>,
    addr: &str,
    auth_required: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = normalize_addr(addr).parse()?;

    let session_manager = Arc::new(LocalSessionManager::default());
    let mcp_service = StreamableHttpService::new(
        {
            let server = server.clone();
            move || Ok(server.clone())
        },
        session_manager,
        StreamableHttpServerConfig {
            sse_keep_alive: Some(SSE_KEEP_ALIVE),
            stateful_mode: true,
        },
    );
    let mcp_router = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(middleware::from_fn_with_state(
            AuthGate {
                required: auth_required,
            },
            bearer_gate,
        ));

    // The SSE stream is always served unauthenticated.
    let (sse_server, sse_router) = SseServer::new(SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: shutdown.clone(),
        sse_keep_alive: Some(SSE_KEEP_ALIVE),
    });
    let _sse_ct = sse_server.with_service({
        let server = server.clone();
        move || server.clone()
    });

    let app = ui::router(manager).merge(sse_router).merge(mcp_router);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on HTTP {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_addr_defaults_host() {
        assert_eq!(normalize_addr(":5000"), "0.0.0.0:5000");
        assert_eq!(normalize_addr("127.0.0.1:8085"), "127.0.0.1:8085");
    }
}
