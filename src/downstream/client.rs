//! A per-call MCP client over Streamable HTTP, authenticated with a
//! downstream-scoped bearer token.
//!
//! Each `list_tools`/`call_tool` invocation opens its own `rmcp` client
//! rather than keeping a long-lived connection per server: downstream
//! tokens are short-lived and session state offers nothing worth reusing
//! across calls here.

use std::time::Duration;

use rmcp::model::{CallToolRequestParam, Content, JsonObject, Tool as McpTool};
use rmcp::service::{RoleClient, RunningService as RmcpRunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::ServiceExt;
use tracing::{debug, warn};

use crate::error::{GatewayError, UpstreamKind};

/// A tool call forwarded to a downstream server.
pub struct DownstreamToolCall<'a> {
    pub tool_name: &'a str,
    pub arguments: Option<JsonObject>,
}

/// Connects to one downstream MCP server per operation, using the bearer
/// token supplied for that call.
pub struct DownstreamClient {
    timeout: Duration,
}

impl DownstreamClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect(
        &self,
        url: &str,
        bearer_token: &str,
    ) -> Result<RmcpRunningService<RoleClient, ()>, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("building downstream http client: {e}")))?;

        let config =
            StreamableHttpClientTransportConfig::with_uri(url.to_string()).auth_header(bearer_token.to_string());
        let transport = StreamableHttpClientTransport::with_client(http_client, config);

        ().serve(transport).await.map_err(|e| {
            warn!(url, error = %e, "failed to connect to downstream MCP server");
            GatewayError::Upstream {
                kind: UpstreamKind::DownstreamUnavailable,
                message: e.to_string(),
            }
        })
    }

    /// Discover the tools a downstream server exposes.
    pub async fn list_tools(
        &self,
        url: &str,
        bearer_token: &str,
    ) -> Result<Vec<McpTool>, GatewayError> {
        let service = self.connect(url, bearer_token).await?;
        let result = service.list_tools(Default::default()).await.map_err(|e| {
            map_call_error(url, &e.to_string())
        });
        let _ = service.cancel().await;
        let tools = result?.tools;
        debug!(url, count = tools.len(), "discovered downstream tools");
        Ok(tools)
    }

    /// Invoke a single tool on a downstream server.
    pub async fn call_tool(
        &self,
        url: &str,
        bearer_token: &str,
        call: DownstreamToolCall<'_>,
    ) -> Result<Vec<Content>, GatewayError> {
        let service = self.connect(url, bearer_token).await?;

        let request = CallToolRequestParam {
            name: std::borrow::Cow::Owned(call.tool_name.to_string()),
            arguments: call.arguments,
        };

        let result = service.call_tool(request).await.map_err(|e| map_call_error(url, &e.to_string()));
        let _ = service.cancel().await;

        Ok(result?.content)
    }
}

/// A downstream server's rejection of the token surfaces as "unauthorized"
/// text in most `rmcp` transport errors; treat it distinctly so the caller
/// can invalidate its cached exchange and retry once.
fn map_call_error(url: &str, message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") {
        GatewayError::downstream_rejected(format!("{url}: {message}"))
    } else {
        GatewayError::Upstream {
            kind: UpstreamKind::DownstreamUnavailable,
            message: format!("{url}: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_call_error_distinguishes_auth_rejection_from_unavailability() {
        let auth_err = map_call_error("http://x", "HTTP 401 Unauthorized");
        assert!(matches!(
            auth_err,
            GatewayError::Unauthenticated {
                kind: crate::error::AuthFailureKind::DownstreamRejected,
                ..
            }
        ));

        let conn_err = map_call_error("http://x", "connection refused");
        assert!(matches!(
            conn_err,
            GatewayError::Upstream {
                kind: UpstreamKind::DownstreamUnavailable,
                ..
            }
        ));
    }
}
