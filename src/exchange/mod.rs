//! RFC 8693 OAuth 2.0 Token Exchange client.
//!
//! Exchanges the caller's inbound bearer token for a narrowly-scoped access
//! token addressed to a single downstream server's audience, so that a
//! downstream server never sees the caller's original, broadly-scoped token.

pub mod cache;
pub mod client;

pub use cache::ExchangeCache;
pub use client::{ExchangedToken, TokenExchangeClient, TokenExchangeConfig};
