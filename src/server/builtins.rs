//! The three built-in tools every gateway session sees regardless of
//! activation state: `search_servers`, `enable_server`, `_reset_gateway`.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, Tool as McpTool};
use serde::Deserialize;
use serde_json::json;

use crate::activation::{ActivationEngine, McpSession};
use crate::auth::AuthenticatedPrincipal;
use crate::error::GatewayError;

pub const SEARCH_SERVERS: &str = "search_servers";
pub const ENABLE_SERVER: &str = "enable_server";
pub const RESET_GATEWAY: &str = "_reset_gateway";

/// The built-in tool descriptors, in the stable order `tools/list` puts
/// ahead of every dynamic tool.
pub fn descriptors() -> Vec<McpTool> {
    vec![
        McpTool {
            name: Cow::Borrowed(SEARCH_SERVERS),
            description: Some(Cow::Borrowed(
                "Search the catalog of downstream MCP servers this gateway can proxy to.",
            )),
            input_schema: Arc::new(
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" }
                    }
                })
                .as_object()
                .unwrap()
                .clone(),
            ),
            output_schema: None,
            annotations: None,
            icons: None,
            title: None,
        },
        McpTool {
            name: Cow::Borrowed(ENABLE_SERVER),
            description: Some(Cow::Borrowed(
                "Activate a downstream server for this session, exposing its tools.",
            )),
            input_schema: Arc::new(
                json!({
                    "type": "object",
                    "required": ["server_name"],
                    "properties": {
                        "server_name": { "type": "string" }
                    }
                })
                .as_object()
                .unwrap()
                .clone(),
            ),
            output_schema: None,
            annotations: None,
            icons: None,
            title: None,
        },
        McpTool {
            name: Cow::Borrowed(RESET_GATEWAY),
            description: Some(Cow::Borrowed(
                "Testing-only: clear this session's server activations.",
            )),
            input_schema: Arc::new(json!({ "type": "object" }).as_object().unwrap().clone()),
            output_schema: None,
            annotations: None,
            icons: None,
            title: None,
        },
    ]
}

#[derive(Debug, Deserialize, Default)]
struct SearchServersArgs {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct EnableServerArgs {
    server_name: String,
}

fn text_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(value.to_string())],
        structured_content: Some(value),
        is_error: Some(false),
        meta: None,
    }
}

/// Builds an error `CallToolResult` with `error` set to the failure's short,
/// stable kind label and `message` set to the human-readable detail, so
/// callers can match on `error` without parsing a sentence.
fn error_result(err: &GatewayError) -> CallToolResult {
    let message = err.tool_error_message();
    CallToolResult {
        content: vec![Content::text(message.clone())],
        structured_content: Some(json!({
            "success": false,
            "error": err.kind_label(),
            "message": message,
        })),
        is_error: Some(true),
        meta: None,
    }
}

pub async fn call_search_servers(
    engine: &ActivationEngine,
    session: &McpSession,
    principal: &AuthenticatedPrincipal,
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> CallToolResult {
    let args: SearchServersArgs = arguments
        .map(serde_json::Value::Object)
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();

    let results = engine.search(&args.query, session, principal).await;
    let servers: Vec<_> = results
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "description": r.description,
                "enabled": r.enabled,
                "accessible": r.accessible,
                "required_role": r.required_role,
            })
        })
        .collect();

    text_result(json!({ "servers": servers, "total": servers.len() }))
}

pub async fn call_enable_server(
    engine: &ActivationEngine,
    session: &McpSession,
    principal: &AuthenticatedPrincipal,
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> CallToolResult {
    let args: Result<EnableServerArgs, _> = arguments
        .map(serde_json::Value::Object)
        .ok_or_else(|| GatewayError::InvalidArgument("missing `server_name`".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| GatewayError::InvalidArgument(format!("invalid arguments: {e}")))
        });

    let args = match args {
        Ok(a) => a,
        Err(e) => return error_result(&e),
    };

    match engine.enable(session, &args.server_name, principal).await {
        Ok(outcome) => {
            let tools: Vec<_> = outcome.tools.iter().map(|t| t.as_str().to_string()).collect();
            text_result(json!({ "success": true, "tools": tools }))
        }
        Err(e) => error_result(&e),
    }
}

pub async fn call_reset_gateway(engine: &ActivationEngine, session: &McpSession) -> CallToolResult {
    engine.reset(session).await;
    text_result(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_ordered_search_enable_reset() {
        let names: Vec<_> = descriptors().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec![SEARCH_SERVERS, ENABLE_SERVER, RESET_GATEWAY]);
    }

    #[test]
    fn enable_server_requires_server_name_argument() {
        let err = GatewayError::InvalidArgument("missing `server_name`".to_string());
        let result = error_result(&err);
        assert_eq!(result.is_error, Some(true));
        match result.structured_content {
            Some(serde_json::Value::Object(obj)) => {
                assert_eq!(obj.get("error").and_then(|v| v.as_str()), Some("InvalidArgument"));
                assert!(
                    obj.get("message")
                        .and_then(|v| v.as_str())
                        .unwrap()
                        .contains("server_name")
                );
            }
            other => panic!("expected structured object, got {other:?}"),
        }
    }
}
