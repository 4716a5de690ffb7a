use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use mcp_authed_gateway::auth::JwksCache;
use mcp_authed_gateway::config::GatewayConfig;
use mcp_authed_gateway::downstream::DownstreamClient;
use mcp_authed_gateway::exchange::{ExchangeCache, TokenExchangeClient, TokenExchangeConfig};
use mcp_authed_gateway::registry::ServerRegistry;
use mcp_authed_gateway::server::{self, AuthSettings};
use mcp_authed_gateway::ActivationEngine;

#[derive(Parser)]
#[command(name = "mcp-authed-gateway")]
#[command(about = "Authenticated MCP gateway: OIDC bearer auth plus dynamic tool proxying")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway's MCP Streamable HTTP server.
    Serve(GatewayConfig),
    /// Load and validate configuration without starting the server.
    CheckConfig(GatewayConfig),
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mcp_authed_gateway=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();
    Ok(())
}

fn build_engine(config: &GatewayConfig) -> Result<Arc<ActivationEngine>> {
    let registry = Arc::new(ServerRegistry::load_from_path(std::path::Path::new(
        &config.server_catalog_path,
    ))?);

    let exchange_client = Arc::new(TokenExchangeClient::new(TokenExchangeConfig {
        token_endpoint: config.token_endpoint(),
        client_id: config.gateway_client_id.clone(),
        client_secret: config.gateway_client_secret.clone(),
        timeout: config.idp_timeout(),
    }));

    let exchange_cache = Arc::new(ExchangeCache::new());
    let downstream = Arc::new(DownstreamClient::new(config.downstream_timeout()));

    Ok(Arc::new(ActivationEngine::new(
        registry,
        exchange_client,
        exchange_cache,
        downstream,
    )))
}

fn build_auth_settings(config: &GatewayConfig) -> Arc<AuthSettings> {
    Arc::new(AuthSettings {
        jwks: Arc::new(JwksCache::new(
            config.jwks_url(),
            config.jwks_refresh_ttl_seconds,
            config.allow_stale_jwks,
            config.idp_timeout(),
        )),
        issuer: config.issuer_url.clone(),
        audience: config.gateway_audience.clone(),
        algorithm_allowlist: config.algorithm_allowlist.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => {
            info!(bind = %config.bind_address(), catalog = %config.server_catalog_path, "starting gateway");

            let engine = build_engine(&config)?;
            let auth = build_auth_settings(&config);

            info!(servers = engine.registry().len(), "loaded server catalog");

            server::start_mcp_http(
                engine,
                auth,
                &config.bind_address(),
                Duration::from_millis(config.downstream_timeout_ms),
            )
            .await?;
        }
        Commands::CheckConfig(config) => {
            let engine = build_engine(&config)?;
            println!(
                "config OK: issuer={} audience={} servers={} bind={}",
                config.issuer_url,
                config.gateway_audience,
                engine.registry().len(),
                config.bind_address()
            );
        }
    }

    Ok(())
}
