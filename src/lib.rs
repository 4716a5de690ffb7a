pub mod activation;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod downstream;
pub mod error;
pub mod exchange;
pub mod registry;
pub mod server;
pub mod types;

pub use activation::{ActivationEngine, McpSession};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use registry::ServerRegistry;
pub use server::{AuthSettings, GatewayServer};
