//! Process configuration: the environment/CLI table from §6, loaded via
//! `clap` the same way the teacher's `McpHttp` subcommand wires its flags.

use std::time::Duration;

use clap::Args;

/// Environment- and flag-backed gateway configuration.
#[derive(Debug, Clone, Args)]
pub struct GatewayConfig {
    /// Absolute URL used to verify `iss` and derive JWKS/token endpoints.
    #[arg(long, env = "GATEWAY_ISSUER_URL")]
    pub issuer_url: String,

    /// Required value for `aud` on inbound tokens.
    #[arg(long, env = "GATEWAY_AUDIENCE")]
    pub gateway_audience: String,

    /// Confidential client id used for RFC 8693 token exchange.
    #[arg(long, env = "GATEWAY_CLIENT_ID")]
    pub gateway_client_id: String,

    /// Confidential client secret used for RFC 8693 token exchange.
    #[arg(long, env = "GATEWAY_CLIENT_SECRET")]
    pub gateway_client_secret: String,

    /// Inbound port.
    #[arg(long, env = "GATEWAY_LISTEN_PORT", default_value_t = 8080)]
    pub listen_port: u16,

    /// Path to the server catalog document.
    #[arg(long, env = "GATEWAY_SERVER_CATALOG_PATH")]
    pub server_catalog_path: String,

    /// Cache TTL for JWKS, in seconds.
    #[arg(long, env = "GATEWAY_JWKS_REFRESH_TTL_SECONDS", default_value_t = 600)]
    pub jwks_refresh_ttl_seconds: u64,

    /// Timeout for IdP calls (JWKS fetch, token exchange), in milliseconds.
    #[arg(long, env = "GATEWAY_IDP_TIMEOUT_MS", default_value_t = 5_000)]
    pub idp_timeout_ms: u64,

    /// Timeout for downstream MCP calls, in milliseconds.
    #[arg(long, env = "GATEWAY_DOWNSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    pub downstream_timeout_ms: u64,

    /// Permitted JWS algorithms for inbound tokens, comma-separated.
    #[arg(long, env = "GATEWAY_ALGORITHM_ALLOWLIST", value_delimiter = ',', default_value = "RS256")]
    pub algorithm_allowlist: Vec<String>,

    /// Whether to cache exchanged downstream tokens.
    #[arg(long, env = "GATEWAY_EXCHANGE_CACHE_ENABLED", default_value_t = true)]
    pub exchange_cache_enabled: bool,

    /// Whether to serve a stale JWKS cache if a refresh fetch fails.
    #[arg(long, env = "GATEWAY_ALLOW_STALE_JWKS", default_value_t = true)]
    pub allow_stale_jwks: bool,
}

impl GatewayConfig {
    pub fn jwks_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer_url.trim_end_matches('/'))
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.issuer_url.trim_end_matches('/'))
    }

    pub fn idp_timeout(&self) -> Duration {
        Duration::from_millis(self.idp_timeout_ms)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GatewayConfig {
        GatewayConfig {
            issuer_url: "https://idp.example/realms/main".to_string(),
            gateway_audience: "mcp-gateway".to_string(),
            gateway_client_id: "gateway".to_string(),
            gateway_client_secret: "secret".to_string(),
            listen_port: 9000,
            server_catalog_path: "catalog.json".to_string(),
            jwks_refresh_ttl_seconds: 600,
            idp_timeout_ms: 5_000,
            downstream_timeout_ms: 30_000,
            algorithm_allowlist: vec!["RS256".to_string()],
            exchange_cache_enabled: true,
            allow_stale_jwks: true,
        }
    }

    #[test]
    fn jwks_url_derives_from_issuer_and_strips_trailing_slash() {
        let mut cfg = sample();
        cfg.issuer_url = "https://idp.example/realms/main/".to_string();
        assert_eq!(
            cfg.jwks_url(),
            "https://idp.example/realms/main/protocol/openid-connect/certs"
        );
    }

    #[test]
    fn token_endpoint_derives_from_issuer() {
        let cfg = sample();
        assert_eq!(
            cfg.token_endpoint(),
            "https://idp.example/realms/main/protocol/openid-connect/token"
        );
    }

    #[test]
    fn bind_address_uses_configured_port() {
        let cfg = sample();
        assert_eq!(cfg.bind_address(), "0.0.0.0:9000");
    }
}
