//! RFC 8693 token-exchange HTTP client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, UpstreamKind};

const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Configuration for reaching the identity provider's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenExchangeConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

/// The RFC 8693 request body, `application/x-www-form-urlencoded`.
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'static str,
    subject_token: &'a str,
    subject_token_type: &'static str,
    requested_token_type: &'static str,
    audience: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// The RFC 8693 success response.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangedToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub issued_token_type: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct TokenEndpointError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// RFC 8693 token-exchange client, scoped to a single identity provider.
pub struct TokenExchangeClient {
    config: TokenExchangeConfig,
    http: reqwest::Client,
}

impl TokenExchangeClient {
    pub fn new(config: TokenExchangeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build token-exchange HTTP client");
        Self { config, http }
    }

    /// Exchange `subject_token` (the caller's validated bearer token) for a
    /// token addressed to `audience`, the downstream server's IdP client id.
    pub async fn exchange(
        &self,
        subject_token: &str,
        audience: &str,
    ) -> Result<ExchangedToken, GatewayError> {
        debug!(audience, "exchanging subject token for downstream audience");

        let body = TokenExchangeRequest {
            grant_type: GRANT_TYPE_TOKEN_EXCHANGE,
            subject_token,
            subject_token_type: TOKEN_TYPE_ACCESS_TOKEN,
            requested_token_type: TOKEN_TYPE_ACCESS_TOKEN,
            audience,
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
        };

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream {
                kind: UpstreamKind::IdpUnavailable,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<ExchangedToken>().await.map_err(|e| {
                GatewayError::Upstream {
                    kind: UpstreamKind::IdpUnavailable,
                    message: format!("malformed token-exchange response: {e}"),
                }
            });
        }

        let status_code = status.as_u16();
        let parsed = response.json::<TokenEndpointError>().await.ok();
        let detail = parsed
            .map(|e| match e.error_description {
                Some(d) => format!("{}: {}", e.error, d),
                None => e.error,
            })
            .unwrap_or_else(|| format!("HTTP {status_code}"));

        warn!(status = status_code, detail = %detail, "token exchange rejected");

        match status_code {
            400 => Err(GatewayError::subject_token_invalid(detail)),
            401 | 403 => Err(GatewayError::PermissionDenied(format!(
                "identity provider denied token exchange for target_audience `{audience}`: {detail}"
            ))),
            500..=599 => Err(GatewayError::Upstream {
                kind: UpstreamKind::IdpUnavailable,
                message: detail,
            }),
            _ => Err(GatewayError::Upstream {
                kind: UpstreamKind::IdpUnavailable,
                message: format!("unexpected status {status_code}: {detail}"),
            }),
        }
    }
}
