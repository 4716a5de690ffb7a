//! Proxy tool dispatcher: the per-call path for any registered
//! [`DynamicTool`](crate::activation::DynamicTool).

use rmcp::model::Content;
use serde_json::Value;
use tracing::warn;

use crate::activation::{ActivationEngine, McpSession};
use crate::auth::AuthenticatedPrincipal;
use crate::downstream::DownstreamToolCall;
use crate::error::GatewayError;

/// Dispatches calls to dynamic (proxied) tools, per the 7-step algorithm:
/// resolve, authorize, validate, exchange, invoke, retry-once-on-401,
/// translate.
pub struct ProxyDispatcher<'a> {
    engine: &'a ActivationEngine,
}

impl<'a> ProxyDispatcher<'a> {
    pub fn new(engine: &'a ActivationEngine) -> Self {
        Self { engine }
    }

    pub async fn dispatch(
        &self,
        session: &McpSession,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
        principal: &AuthenticatedPrincipal,
    ) -> Result<Vec<Content>, GatewayError> {
        // Step 1: resolve owning server.
        let tool = self.engine.find_tool(tool_name).await?;

        // Step 2: session must have enabled the owning server.
        if !session.is_enabled(&tool.owning_server).await {
            return Err(GatewayError::PreconditionFailedNotEnabled(format!(
                "`{tool_name}` requires `enable_server` for `{}` first",
                tool.owning_server
            )));
        }

        // Step 3: validate arguments against the tool's declared schema.
        validate_arguments(&tool.input_schema, arguments.as_ref())?;

        let server = self.engine.registry().get(&tool.owning_server)?.clone();

        // Step 4: exchange for the owning server's audience.
        let token = self
            .engine
            .exchange_for(principal, server.audience.as_str())
            .await?;

        // Step 5: invoke downstream.
        let call = DownstreamToolCall {
            tool_name,
            arguments: arguments.clone(),
        };
        let first_attempt = self
            .engine
            .downstream_client()
            .call_tool(&server.url, &token, call)
            .await;

        match first_attempt {
            Ok(content) => Ok(content),
            Err(GatewayError::Unauthenticated {
                kind: crate::error::AuthFailureKind::DownstreamRejected,
                ..
            }) => {
                // Step 6: invalidate and retry exactly once.
                warn!(tool_name, server = %tool.owning_server, "downstream rejected token, retrying once after invalidation");
                self.engine
                    .invalidate_exchange(principal, server.audience.as_str())
                    .await;
                let retried_token = self
                    .engine
                    .exchange_for(principal, server.audience.as_str())
                    .await?;
                let retry_call = DownstreamToolCall {
                    tool_name,
                    arguments,
                };
                self.engine
                    .downstream_client()
                    .call_tool(&server.url, &retried_token, retry_call)
                    .await
                    .map_err(|_| GatewayError::downstream_rejected(tool_name))
            }
            Err(other) => Err(other),
        }
    }
}

/// A minimal JSON Schema `required`/`type` check — enough to catch missing
/// required fields and gross type mismatches without pulling in a full
/// schema-validation dependency the rest of the gateway has no other use for.
fn validate_arguments(
    schema: &serde_json::Map<String, Value>,
    arguments: Option<&serde_json::Map<String, Value>>,
) -> Result<(), GatewayError> {
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let args = arguments.cloned().unwrap_or_default();

    for field in &required {
        let Some(field_name) = field.as_str() else {
            continue;
        };
        if !args.contains_key(field_name) {
            return Err(GatewayError::InvalidArgument(format!(
                "missing required argument `{field_name}`"
            )));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in &args {
        let Some(expected_type) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if !matches_json_type(value, expected_type) {
            return Err(GatewayError::InvalidArgument(format!(
                "argument `{key}` does not match declared type `{expected_type}`"
            )));
        }
    }

    Ok(())
}

fn matches_json_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> serde_json::Map<String, Value> {
        json!({
            "type": "object",
            "required": ["location"],
            "properties": {
                "location": { "type": "string" },
                "units": { "type": "string" }
            }
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn missing_required_argument_is_invalid_argument() {
        let err = validate_arguments(&schema(), None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[test]
    fn present_required_argument_with_correct_type_passes() {
        let mut args = serde_json::Map::new();
        args.insert("location".to_string(), json!("Warsaw"));
        assert!(validate_arguments(&schema(), Some(&args)).is_ok());
    }

    #[test]
    fn wrong_type_for_a_declared_property_is_rejected() {
        let mut args = serde_json::Map::new();
        args.insert("location".to_string(), json!(42));
        let err = validate_arguments(&schema(), Some(&args)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }
}
