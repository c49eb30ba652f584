//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that open the
//! graph service and mount the MCP tool handler on a running server.

use crate::config::ChronicleConfig;
use crate::service::GraphService;
use crate::tools::ChronicleTools;
use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::Arc;

/// Start on the transport named in `config.server.transport`.
pub async fn serve(config: ChronicleConfig) -> Result<()> {
    match config.server.transport.as_str() {
        "stdio" => serve_stdio(config).await,
        "http" => serve_http(config).await,
        other => anyhow::bail!("unknown transport: {other}. Supported: stdio, http"),
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: ChronicleConfig) -> Result<()> {
    tracing::info!("starting Chronicle MCP server on stdio");

    let service = Arc::new(GraphService::open(config)?);
    let tools = ChronicleTools::new(Arc::clone(&service));
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    service.shutdown_token().cancel();
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: ChronicleConfig) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let bind_addr = format!("{host}:{port}");

    tracing::info!(addr = %bind_addr, "starting Chronicle MCP server on HTTP");

    let service = Arc::new(GraphService::open(config)?);
    let shutdown = service.shutdown_token().clone();

    let mcp = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(ChronicleTools::new(Arc::clone(&service))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", mcp);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
