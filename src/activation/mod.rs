//! Activation engine: the process-global proxy-tool registry, shared by
//! every session, plus the `search`/`enable`/`reset` operations that gate
//! its visibility per session.
//!
//! Proxy tools are registered once, globally, the first time any session
//! discovers them; which tools are *visible and callable* is a property of
//! the calling session ([`McpSession`]), enforced here and at dispatch time.
//! One [`McpSession`] exists per inbound MCP connection — the transport
//! layer already gives each connection its own server-handler instance, so
//! session state lives there rather than in a second lookup table here.

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::auth::AuthenticatedPrincipal;
use crate::downstream::DownstreamClient;
use crate::error::{GatewayError, NotFoundKind};
use crate::exchange::{ExchangeCache, TokenExchangeClient};
use crate::registry::ServerRegistry;
use crate::types::ToolName;

pub use session::McpSession;

/// A registered proxy tool, process-global.
#[derive(Debug, Clone)]
pub struct DynamicTool {
    pub tool_name: ToolName,
    pub owning_server: String,
    pub description: String,
    pub input_schema: Arc<serde_json::Map<String, serde_json::Value>>,
}

/// Summary of one server returned by `search_servers`.
#[derive(Debug, Clone)]
pub struct ServerSearchResult {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub accessible: bool,
    pub required_role: Option<String>,
}

/// Result of a successful `enable_server` call.
#[derive(Debug, Clone)]
pub struct EnableOutcome {
    pub tools: Vec<ToolName>,
}

/// Owns the global `DynamicTool` registry and implements
/// `search`/`enable`/`reset` per the discovery and dispatch algorithm,
/// operating on a caller-supplied [`McpSession`].
pub struct ActivationEngine {
    registry: Arc<ServerRegistry>,
    exchange_client: Arc<TokenExchangeClient>,
    exchange_cache: Arc<ExchangeCache>,
    downstream: Arc<DownstreamClient>,
    tools: RwLock<HashMap<ToolName, DynamicTool>>,
    /// Registration order of `tools`, so `tools/list` can expose dynamic
    /// tools in stable insertion order rather than `HashMap` iteration order.
    insertion_order: RwLock<Vec<ToolName>>,
}

impl ActivationEngine {
    pub fn new(
        registry: Arc<ServerRegistry>,
        exchange_client: Arc<TokenExchangeClient>,
        exchange_cache: Arc<ExchangeCache>,
        downstream: Arc<DownstreamClient>,
    ) -> Self {
        Self {
            registry,
            exchange_client,
            exchange_cache,
            downstream,
            tools: RwLock::new(HashMap::new()),
            insertion_order: RwLock::new(Vec::new()),
        }
    }

    /// Substring, case-insensitive search over the catalog (§4.5). Full
    /// catalog is returned with `accessible` computed from the principal's
    /// roles rather than filtered, per the documented Open Question choice.
    pub async fn search(
        &self,
        query: &str,
        session: &McpSession,
        principal: &AuthenticatedPrincipal,
    ) -> Vec<ServerSearchResult> {
        let needle = query.to_ascii_lowercase();

        let mut results = Vec::new();
        for server in self.registry.list() {
            if !needle.is_empty() && !server.name.as_str().to_ascii_lowercase().contains(&needle) {
                continue;
            }
            let enabled = session.is_enabled(server.name.as_str()).await;
            let accessible = server
                .required_role
                .as_ref()
                .map(|role| principal.has_role(role))
                .unwrap_or(true);
            results.push(ServerSearchResult {
                name: server.name.as_str().to_string(),
                description: server.description.clone(),
                enabled,
                accessible,
                required_role: server.required_role.as_ref().map(|r| r.as_str().to_string()),
            });
        }
        results
    }

    /// Activate a server for `session`, per the 7-step algorithm in §4.5.
    pub async fn enable(
        &self,
        session: &McpSession,
        server_name: &str,
        principal: &AuthenticatedPrincipal,
    ) -> Result<EnableOutcome, GatewayError> {
        // Step 1: resolve the server.
        let server = self.registry.get(server_name)?.clone();

        // Step 2: idempotence — return the previously recorded list unchanged.
        if let Some(tools) = session.enabled_tools(server_name).await {
            return Ok(EnableOutcome { tools });
        }

        // Single-flight per (session, server): concurrent enable calls for the
        // same pair serialize on this session-local lock instead of
        // double-discovering.
        let lock = session.enable_lock_for(server_name).await;
        let _guard = lock.lock().await;

        // Re-check idempotence now that we hold the lock — another task may
        // have just finished the discovery we were about to duplicate.
        if let Some(tools) = session.enabled_tools(server_name).await {
            return Ok(EnableOutcome { tools });
        }

        // Step 3: fast-path role pre-check.
        if let Some(required) = &server.required_role {
            if !principal.has_role(required) {
                return Err(GatewayError::PermissionDenied(format!(
                    "principal lacks required role `{required}` for server `{server_name}`"
                )));
            }
        }

        // Step 4: token exchange for the server's audience.
        let exchanged = self.exchange_for(principal, server.audience.as_str()).await?;

        // Step 5: downstream discovery.
        let discovered = self.downstream.list_tools(&server.url, &exchanged).await?;

        // Step 6: register any newly-seen tool names globally, idempotently,
        // rejecting cross-server name collisions (I2).
        let mut tool_names = Vec::with_capacity(discovered.len());
        {
            let mut tools = self.tools.write().await;
            let mut order = self.insertion_order.write().await;
            for tool in &discovered {
                let name = ToolName::new(tool.name.to_string());
                match tools.get(&name) {
                    Some(existing) if existing.owning_server != server_name => {
                        return Err(GatewayError::ConflictToolNameCollision(format!(
                            "{} already owned by {}",
                            name, existing.owning_server
                        )));
                    }
                    Some(_) => {}
                    None => {
                        let schema = tool.input_schema.as_ref().clone();
                        tools.insert(
                            name.clone(),
                            DynamicTool {
                                tool_name: name.clone(),
                                owning_server: server_name.to_string(),
                                description: tool
                                    .description
                                    .clone()
                                    .map(|d| d.to_string())
                                    .unwrap_or_default(),
                                input_schema: Arc::new(schema),
                            },
                        );
                        order.push(name.clone());
                    }
                }
                tool_names.push(name);
            }
        }

        // Step 7: record visibility for this session.
        session.set_enabled(server_name, tool_names.clone()).await;

        info!(server_name, tool_count = tool_names.len(), "enabled server for session");
        Ok(EnableOutcome { tools: tool_names })
    }

    /// Clear a session's activation entries. Never unregisters global
    /// proxies — other sessions may still depend on them.
    pub async fn reset(&self, session: &McpSession) {
        session.clear().await;
        info!(session_id = %session.session_id(), "reset session activation state");
    }

    /// Look up a globally-registered tool by name.
    pub async fn find_tool(&self, tool_name: &str) -> Result<DynamicTool, GatewayError> {
        self.tools
            .read()
            .await
            .get(&ToolName::new(tool_name))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                kind: NotFoundKind::Tool,
                name: tool_name.to_string(),
            })
    }

    /// All globally-registered dynamic tools, in registration order, for
    /// `tools/list` (built-ins are listed ahead of these by the caller).
    pub async fn list_tools_ordered(&self) -> Vec<DynamicTool> {
        let tools = self.tools.read().await;
        let order = self.insertion_order.read().await;
        order.iter().filter_map(|name| tools.get(name).cloned()).collect()
    }

    /// The server registry, for dispatch-time audience/url lookups.
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Exchange `principal`'s token for `audience`, consulting the cache first.
    pub async fn exchange_for(
        &self,
        principal: &AuthenticatedPrincipal,
        audience: &str,
    ) -> Result<String, GatewayError> {
        if let Some(cached) = self.exchange_cache.get(&principal.raw_token, audience).await {
            return Ok(cached.access_token);
        }
        let exchanged = self
            .exchange_client
            .exchange(&principal.raw_token, audience)
            .await?;
        self.exchange_cache
            .put(&principal.raw_token, audience, exchanged.clone())
            .await;
        Ok(exchanged.access_token)
    }

    /// Invalidate a cached exchanged token, e.g. after a downstream 401.
    pub async fn invalidate_exchange(&self, principal: &AuthenticatedPrincipal, audience: &str) {
        self.exchange_cache
            .invalidate(&principal.raw_token, audience)
            .await;
    }

    pub fn downstream_client(&self) -> &DownstreamClient {
        &self.downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;
    use std::time::Duration;

    fn registry_with(servers_json: &str) -> Arc<ServerRegistry> {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(servers_json.as_bytes()).unwrap();
        Arc::new(ServerRegistry::load_from_path(file.path()).unwrap())
    }

    fn engine(servers_json: &str) -> ActivationEngine {
        let registry = registry_with(servers_json);
        let exchange_client = Arc::new(crate::exchange::TokenExchangeClient::new(
            crate::exchange::TokenExchangeConfig {
                token_endpoint: "http://127.0.0.1:1/token".to_string(),
                client_id: "gateway".to_string(),
                client_secret: "secret".to_string(),
                timeout: Duration::from_secs(1),
            },
        ));
        ActivationEngine::new(
            registry,
            exchange_client,
            Arc::new(ExchangeCache::new()),
            Arc::new(DownstreamClient::new(Duration::from_secs(1))),
        )
    }

    const CATALOG: &str = r#"{
        "servers": {
            "weather": {
                "description": "Weather lookups",
                "url": "https://weather.invalid/mcp",
                "audience": "weather-api",
                "required_role": "access:weather"
            }
        }
    }"#;

    fn principal(roles: Vec<&str>) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            subject: "u1".to_string(),
            username: None,
            roles: roles.into_iter().map(crate::types::RealmRole::new).collect(),
            raw_token: "token".to_string(),
            expires_at: 0,
        }
    }

    #[tokio::test]
    async fn enable_unknown_server_returns_not_found() {
        let engine = engine(CATALOG);
        let session = McpSession::new(SessionId::new("s1"));
        let err = engine
            .enable(&session, "nonexistent", &principal(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::NotFound {
                kind: NotFoundKind::Server,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn enable_without_required_role_is_permission_denied_before_any_network_call() {
        let engine = engine(CATALOG);
        let session = McpSession::new(SessionId::new("s1"));
        let err = engine
            .enable(&session, "weather", &principal(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn search_reports_full_catalog_with_accessible_flag() {
        let engine = engine(CATALOG);
        let session = McpSession::new(SessionId::new("s1"));
        let results = engine.search("", &session, &principal(vec![])).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].accessible);
        assert!(!results[0].enabled);
    }

    #[tokio::test]
    async fn reset_clears_session_visibility_without_touching_global_registry() {
        let engine = engine(CATALOG);
        let session = McpSession::new(SessionId::new("s1"));
        session
            .set_enabled("weather", vec![ToolName::new("get_weather")])
            .await;
        engine.reset(&session).await;
        assert!(!session.is_enabled("weather").await);
    }
}
