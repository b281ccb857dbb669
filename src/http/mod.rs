//! HTTP entry points for the protocol endpoint
//!
//! Provides the `/mcp` dispatcher plus general metadata endpoints.

pub mod handlers;
