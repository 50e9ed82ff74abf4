//! Stdio MCP server wrapping [`N8nService`].

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use rmcp::ServiceExt;
use rmcp::transport::stdio;

use crate::client::N8nClient;
use crate::config::Settings;

use super::tools::N8nService;

pub struct N8nMcpServer {
    service: N8nService,
}

impl N8nMcpServer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client =
            N8nClient::new(settings.client_config()).context("Failed to create n8n API client")?;
        Ok(Self {
            service: N8nService::new(client, settings.mcp.clone()),
        })
    }

    pub fn service(&self) -> &N8nService {
        &self.service
    }

    /// Serves MCP over stdin/stdout until the peer disconnects.
    ///
    /// An unreachable n8n instance is logged but does not stop the server.
    pub async fn run_stdio(self) -> Result<()> {
        let client = self.service.client();
        info!("Starting MCP server (stdio transport), n8n API at {}", client.endpoint());

        match client.health_check().await {
            Ok(true) => info!("n8n API connection verified"),
            Ok(false) => warn!(
                "n8n API at {} is not reachable; tool calls will fail until it is",
                client.endpoint()
            ),
            Err(e) => warn!("n8n API health check did not complete: {}", e),
        }

        let service = self
            .service
            .serve(stdio())
            .await
            .map_err(|e| anyhow!("MCP server error: {}", e))?;

        let quit_reason = service
            .waiting()
            .await
            .map_err(|e| anyhow!("MCP server error: {}", e))?;

        info!("MCP server stopped: {:?}", quit_reason);
        Ok(())
    }
}
