//! JSON-RPC 2.0 envelope representations and formatting utilities
//!
//! Provides standardized mapping of internal AppErrors to valid JSON-RPC payloads.

use serde_json::{json, Map, Value};

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const METHOD_NOT_ALLOWED: i32 = -32000;

/// Shape of a decoded inbound envelope, before method routing.
#[derive(Debug)]
pub enum Envelope {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// A result or error envelope; clients must not send these to a server.
    Response { id: Option<Value> },
    Invalid {
        id: Option<Value>,
    },
}

/// Classifies a raw JSON payload as one of the JSON-RPC 2.0 envelope kinds.
///
/// The id is extracted before any structural check so that later error
/// envelopes can echo it whenever it was determinable.
pub fn classify_envelope(payload: &Value) -> Envelope {
    let Some(object) = payload.as_object() else {
        return Envelope::Invalid { id: None };
    };

    let id = object.get("id").cloned();

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Envelope::Invalid { id };
    }

    if object.contains_key("result") || object.contains_key("error") {
        return Envelope::Response { id };
    }

    let method = match object.get("method").and_then(Value::as_str).map(str::trim) {
        Some(method) if !method.is_empty() => method.to_string(),
        _ => return Envelope::Invalid { id },
    };

    let params = object.get("params").cloned();

    match id {
        Some(id) => Envelope::Request { id, method, params },
        None => Envelope::Notification { method, params },
    }
}

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::Internal { message, .. } => {
            tracing::error!(error = %message, "request failed with internal error");
            json_rpc_error(id, INTERNAL_ERROR, "Internal server error")
        }
    }
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), json!(code));
    error.insert("message".to_string(), json!(message));
    if let Some(data) = data {
        error.insert("data".to_string(), data);
    }

    json!({
        "jsonrpc": JSONRPC_VERSION,
        "error": Value::Object(error),
        "id": id.unwrap_or(Value::Null)
    })
}

pub fn json_rpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result
    })
}

pub fn json_rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params
    })
}
