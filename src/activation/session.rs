//! Per-session activation state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::types::{SessionId, ToolName};

/// One inbound client's conversation: which servers it has enabled and
/// which tool names that activation exposed. Transport layers that create
/// one server-handler instance per connection should hold exactly one of
/// these per instance; it lives as long as the MCP session does.
pub struct McpSession {
    session_id: SessionId,
    enabled_servers: RwLock<HashMap<String, Vec<ToolName>>>,
    /// Per-server single-flight guard on `enable`, created lazily.
    enable_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl McpSession {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            enabled_servers: RwLock::new(HashMap::new()),
            enable_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn is_enabled(&self, server_name: &str) -> bool {
        self.enabled_servers.read().await.contains_key(server_name)
    }

    pub async fn enabled_tools(&self, server_name: &str) -> Option<Vec<ToolName>> {
        self.enabled_servers.read().await.get(server_name).cloned()
    }

    pub async fn set_enabled(&self, server_name: &str, tools: Vec<ToolName>) {
        self.enabled_servers
            .write()
            .await
            .insert(server_name.to_string(), tools);
    }

    /// Drop every activation entry for this session.
    pub async fn clear(&self) {
        self.enabled_servers.write().await.clear();
    }

    /// The single-flight lock guarding concurrent `enable(server_name)`
    /// calls for this session.
    pub async fn enable_lock_for(&self, server_name: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.enable_locks.read().await;
            if let Some(lock) = locks.get(server_name) {
                return lock.clone();
            }
        }
        let mut locks = self.enable_locks.write().await;
        locks
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newly_created_session_has_no_enabled_servers() {
        let session = McpSession::new(SessionId::new("s1"));
        assert!(!session.is_enabled("weather").await);
        assert!(session.enabled_tools("weather").await.is_none());
    }

    #[tokio::test]
    async fn set_enabled_then_clear_reverts_to_disabled() {
        let session = McpSession::new(SessionId::new("s1"));
        session
            .set_enabled("weather", vec![ToolName::new("get_weather")])
            .await;
        assert!(session.is_enabled("weather").await);

        session.clear().await;
        assert!(!session.is_enabled("weather").await);
        assert!(session.enabled_tools("weather").await.is_none());
    }

    #[tokio::test]
    async fn enable_lock_for_returns_the_same_lock_for_the_same_server() {
        let session = McpSession::new(SessionId::new("s1"));
        let a = session.enable_lock_for("weather").await;
        let b = session.enable_lock_for("weather").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
