//! The per-request Model Context Protocol engine
//!
//! Decodes one JSON-RPC envelope, validates it, routes it to the matching
//! capability, and formats the response. An instance lives for exactly one
//! HTTP request; the capability table it consults is shared read-only
//! configuration and is never mutated after startup.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::CapabilityTable;
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, classify_envelope, is_json_rpc_error, json_rpc_error,
    json_rpc_error_with_data, json_rpc_result, Envelope, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND,
};
use crate::mcp::transport::NotificationSender;
use crate::LifecycleStats;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

/// One request's RPC endpoint. Connected to at most one transport, never
/// reused across requests.
pub struct ProtocolServer {
    capabilities: Arc<CapabilityTable>,
    lifecycle: Arc<LifecycleStats>,
    released: bool,
}

impl ProtocolServer {
    pub fn new(capabilities: Arc<CapabilityTable>, lifecycle: Arc<LifecycleStats>) -> Self {
        lifecycle.record_server_built();
        Self {
            capabilities,
            lifecycle,
            released: false,
        }
    }

    /// Idempotent release; also runs on drop so every exit path tears the
    /// instance down exactly once.
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.lifecycle.record_server_released();
        debug!("protocol server released");
    }

    /// Full decode-validate-route cycle for one inbound envelope. Returns
    /// `None` when the input was a notification, which produces no response.
    pub async fn handle_message(
        &self,
        payload: Value,
        notifications: NotificationSender,
    ) -> Option<Value> {
        if payload.is_array() {
            // JSON-RPC batching was removed from MCP's streamable HTTP
            // transport; a batch body is an invalid request here.
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        match classify_envelope(&payload) {
            Envelope::Invalid { id } => {
                Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request"))
            }
            Envelope::Response { id } => {
                Some(json_rpc_error(id, INVALID_REQUEST, "Invalid Request"))
            }
            Envelope::Notification { method, params } => {
                self.handle_notification(&method, params);
                None
            }
            Envelope::Request { id, method, params } => {
                Some(self.dispatch(id, &method, params, notifications).await)
            }
        }
    }

    fn handle_notification(&self, method: &str, _params: Option<Value>) {
        match method {
            "notifications/initialized" => debug!("client reported initialized"),
            other => debug!(method = other, "ignoring unknown client notification"),
        }
    }

    async fn dispatch(
        &self,
        id: Value,
        method: &str,
        params: Option<Value>,
        notifications: NotificationSender,
    ) -> Value {
        let response = match method {
            "initialize" => self.handle_initialize(id, params),
            "ping" => json_rpc_result(id, json!({})),
            "prompts/list" => json_rpc_result(
                id,
                json!({ "prompts": self.capabilities.prompt_descriptors() }),
            ),
            "prompts/get" => self.handle_prompts_get(id, params).await,
            "tools/list" => {
                json_rpc_result(id, json!({ "tools": self.capabilities.tool_descriptors() }))
            }
            "tools/call" => self.handle_tools_call(id, params, notifications).await,
            "resources/list" => json_rpc_result(
                id,
                json!({ "resources": self.capabilities.resource_descriptors() }),
            ),
            "resources/read" => self.handle_resources_read(id, params).await,
            _ => json_rpc_error(Some(id), METHOD_NOT_FOUND, "Method not found"),
        };

        info!(
            method = %method,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    fn handle_initialize(&self, id: Value, params: Option<Value>) -> Value {
        if let Err(err) = negotiate_protocol_version(params.as_ref()) {
            return app_error_to_json_rpc(Some(id), err);
        }

        json_rpc_result(
            id,
            json!({
                "protocolVersion": SUPPORTED_PROTOCOL_VERSION,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": {
                    "prompts": { "listChanged": false },
                    "tools": { "listChanged": false },
                    "resources": { "subscribe": false, "listChanged": false },
                    "logging": {}
                }
            }),
        )
    }

    async fn handle_prompts_get(&self, id: Value, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params");
        };

        let get_prompt: GetPromptParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params"),
        };

        let Some(prompt) = self.capabilities.prompt(&get_prompt.name) else {
            return json_rpc_error_with_data(
                Some(id),
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({
                    "code": "prompt_not_found",
                    "message": "unknown prompt name",
                    "details": { "name": get_prompt.name },
                })),
            );
        };

        let arguments = get_prompt.arguments.unwrap_or_else(|| json!({}));
        let arguments = match prompt.validate(arguments) {
            Ok(value) => value,
            Err(err) => return app_error_to_json_rpc(Some(id), err),
        };

        match prompt.render(arguments).await {
            Ok(result) => json_rpc_result(
                id,
                serde_json::to_value(result).expect("prompt result serialization"),
            ),
            Err(err) => app_error_to_json_rpc(Some(id), err),
        }
    }

    async fn handle_tools_call(
        &self,
        id: Value,
        params: Option<Value>,
        notifications: NotificationSender,
    ) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params");
        };

        let tool_call: CallToolParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params"),
        };

        let Some(tool) = self.capabilities.tool(&tool_call.name) else {
            return json_rpc_error_with_data(
                Some(id),
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({
                    "code": "tool_not_found",
                    "message": "unknown tool name",
                    "details": { "name": tool_call.name },
                })),
            );
        };

        // Schema validation runs before the handler; malformed arguments
        // never reach it.
        let arguments = tool_call.arguments.unwrap_or_else(|| json!({}));
        let arguments = match tool.validate(arguments) {
            Ok(value) => value,
            Err(err) => return app_error_to_json_rpc(Some(id), err),
        };

        match tool.call(arguments, notifications).await {
            Ok(output) => json_rpc_result(
                id,
                serde_json::to_value(output).expect("tool result serialization"),
            ),
            Err(err) => app_error_to_json_rpc(Some(id), err),
        }
    }

    async fn handle_resources_read(&self, id: Value, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params");
        };

        let resource_read: ReadResourceParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(Some(id), INVALID_PARAMS, "Invalid params"),
        };

        let Some(resource) = self.capabilities.resource_by_uri(&resource_read.uri) else {
            return json_rpc_error_with_data(
                Some(id),
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({
                    "code": "resource_not_found",
                    "message": "unknown resource uri",
                    "details": { "uri": resource_read.uri },
                })),
            );
        };

        match resource.read().await {
            Ok(contents) => json_rpc_result(
                id,
                serde_json::to_value(contents).expect("resource contents serialization"),
            ),
            Err(err) => app_error_to_json_rpc(Some(id), err),
        }
    }
}

impl Drop for ProtocolServer {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<(), AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        return Err(AppError::bad_request(
            "unsupported_protocol_version",
            "unsupported initialize protocolVersion",
        ));
    }

    Ok(())
}
