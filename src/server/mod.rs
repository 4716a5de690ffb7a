//! Inbound MCP Streamable-HTTP server surface.
//!
//! One [`GatewayServer`] instance is created per inbound connection (the
//! `rmcp` transport calls the factory closure in [`start_mcp_http`] once per
//! session), so the session's activation state lives directly on the
//! instance rather than in a second session-lookup table.

pub mod builtins;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{NotificationContext, RequestContext, RoleServer},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

use crate::activation::{ActivationEngine, McpSession};
use crate::auth::{AuthenticatedPrincipal, JwksCache};
use crate::dispatcher::ProxyDispatcher;
use crate::types::SessionId;

/// HTTP request parts `rmcp` stores in its request extensions for the
/// Streamable-HTTP transport.
type HttpParts = http::request::Parts;

/// Everything a [`GatewayServer`] needs to validate bearer tokens, shared
/// across every session.
pub struct AuthSettings {
    pub jwks: Arc<JwksCache>,
    pub issuer: String,
    pub audience: String,
    pub algorithm_allowlist: Vec<String>,
}

impl AuthSettings {
    async fn validate(&self, token: &str) -> Result<AuthenticatedPrincipal, McpError> {
        self.jwks
            .validate_token(token, &self.issuer, &self.audience, &self.algorithm_allowlist)
            .await
            .map_err(|e| {
                let gateway_err: crate::error::GatewayError = e.into();
                warn!(error = %gateway_err, "bearer token rejected");
                McpError::new(ErrorCode(-32001), gateway_err.to_string(), None)
            })
    }
}

/// The inbound MCP server handler for one connection.
#[derive(Clone)]
pub struct GatewayServer {
    engine: Arc<ActivationEngine>,
    auth: Arc<AuthSettings>,
    session: Arc<McpSession>,
}

impl GatewayServer {
    pub fn new(engine: Arc<ActivationEngine>, auth: Arc<AuthSettings>) -> Self {
        let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
        Self {
            engine,
            auth,
            session: Arc::new(McpSession::new(session_id)),
        }
    }

    fn bearer_token(context: &RequestContext<RoleServer>) -> Option<String> {
        context
            .extensions
            .get::<HttpParts>()
            .and_then(|parts| parts.headers.get(http::header::AUTHORIZATION))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    }

    async fn authenticate(
        &self,
        context: &RequestContext<RoleServer>,
    ) -> Result<AuthenticatedPrincipal, McpError> {
        let token = Self::bearer_token(context).ok_or_else(|| {
            McpError::new(
                ErrorCode(-32001),
                crate::error::GatewayError::missing_token().to_string(),
                None,
            )
        })?;
        self.auth.validate(&token).await
    }
}

impl ServerHandler for GatewayServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn initialize(
        &self,
        _request: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<InitializeResult, McpError>> + Send + '_ {
        async move {
            // I4/scenario 5: a bad token is rejected before any session state exists.
            self.authenticate(&context).await?;

            Ok(InitializeResult {
                protocol_version: ProtocolVersion::V_2025_06_18,
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                server_info: Implementation::from_build_env(),
                instructions: Some(
                    "Authenticated MCP gateway. Call `search_servers` to discover downstream \
                     servers, `enable_server` to activate one for this session, then call its \
                     tools directly."
                        .to_string(),
                ),
            })
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            self.authenticate(&context).await?;

            let mut tools = builtins::descriptors();
            for dynamic in self.engine.list_tools_ordered().await {
                tools.push(Tool {
                    name: std::borrow::Cow::Owned(dynamic.tool_name.into_inner()),
                    description: Some(std::borrow::Cow::Owned(dynamic.description)),
                    input_schema: dynamic.input_schema,
                    output_schema: None,
                    annotations: None,
                    icons: None,
                    title: None,
                });
            }

            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                ..Default::default()
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let arguments = request.arguments;

        async move {
            let principal = self.authenticate(&context).await?;

            let result = match tool_name.as_str() {
                builtins::SEARCH_SERVERS => {
                    builtins::call_search_servers(&self.engine, &self.session, &principal, arguments)
                        .await
                }
                builtins::ENABLE_SERVER => {
                    builtins::call_enable_server(&self.engine, &self.session, &principal, arguments)
                        .await
                }
                builtins::RESET_GATEWAY => {
                    builtins::call_reset_gateway(&self.engine, &self.session).await
                }
                _ => {
                    let dispatcher = ProxyDispatcher::new(&self.engine);
                    match dispatcher
                        .dispatch(&self.session, &tool_name, arguments, &principal)
                        .await
                    {
                        Ok(content) => CallToolResult {
                            content,
                            structured_content: None,
                            is_error: Some(false),
                            meta: None,
                        },
                        Err(e) => CallToolResult {
                            content: vec![Content::text(e.tool_error_message())],
                            structured_content: None,
                            is_error: Some(true),
                            meta: None,
                        },
                    }
                }
            };
            Ok(result)
        }
    }

    fn complete(
        &self,
        _request: CompleteRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CompleteResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<CompleteRequestMethod>()))
    }

    fn set_level(
        &self,
        _request: SetLevelRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<SetLevelRequestMethod>()))
    }

    fn on_cancelled(
        &self,
        _notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_progress(
        &self,
        _notification: ProgressNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Authenticated MCP gateway.".to_string()),
        }
    }
}

/// Start the gateway as an MCP Streamable HTTP server, bound at `/mcp`.
///
/// `request_timeout` bounds every inbound request at the transport layer
/// (on top of the per-downstream-call timeouts the activation engine and
/// dispatcher already enforce), so a hung request can't pin a connection
/// open indefinitely.
pub async fn start_mcp_http(
    engine: Arc<ActivationEngine>,
    auth: Arc<AuthSettings>,
    bind: &str,
    request_timeout: Duration,
) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let engine = engine.clone();
            let auth = auth.clone();
            move || Ok(GatewayServer::new(engine.clone(), auth.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new().nest_service("/mcp", service).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(request_timeout)),
    );
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("MCP gateway listening on http://{}", bind);
    axum::serve(listener, router).await?;

    Ok(())
}
