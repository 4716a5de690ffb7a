//! Outbound MCP client: connects to downstream MCP servers and proxies
//! `tools/list` and `tools/call` through a freshly-exchanged bearer token.

pub mod client;

pub use client::{DownstreamClient, DownstreamToolCall};
