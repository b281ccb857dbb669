//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides the per-request protocol server, the HTTP transport session it is
//! wired to, and the JSON-RPC envelope formatting shared by both.

pub mod rpc;
pub mod server;
pub mod transport;
