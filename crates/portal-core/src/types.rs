//! JSON-RPC protocol types shared by the coalescer and the front end.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};

use crate::errors::GatewayError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request.
///
/// `id` is kept behind an `Arc` so responses can echo it without a deep copy. A missing id
/// deserializes as `null`.
///
/// # Example
///
/// ```
/// use portal_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request =
///     JsonRpcRequest::new("eth_getBlockByNumber", Some(json!(["latest", false])), json!(1));
///
/// assert_eq!(request.method, "eth_getBlockByNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Arc<Value>,
}

fn default_version() -> Cow<'static, str> {
    JSONRPC_VERSION_COW
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&GatewayError> for JsonRpcError {
    fn from(error: &GatewayError) -> Self {
        Self { code: error.rpc_code(), message: error.to_string(), data: error.data() }
    }
}

/// JSON-RPC 2.0 response carrying either `result` or `error`.
///
/// # Example
///
/// ```
/// use portal_core::types::JsonRpcResponse;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let response = JsonRpcResponse::success(json!(null), Arc::new(json!(1)));
/// assert_eq!(serde_json::to_value(&response).unwrap()["result"], json!(null));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<Value>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(result: Value, id: Arc<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }

    #[must_use]
    pub fn from_gateway_error(error: &GatewayError, id: Arc<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: None, error: Some(error.into()), id }
    }

    /// Builds the response for one coalesced batch outcome.
    #[must_use]
    pub fn from_outcome(outcome: &Result<Value, GatewayError>, id: Arc<Value>) -> Self {
        match outcome {
            Ok(result) => Self::success(result.clone(), id),
            Err(error) => Self::from_gateway_error(error, id),
        }
    }
}

/// Inclusive block range `[from, to]` with `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    #[inline]
    #[must_use]
    pub fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to, "Invalid BlockRange: from ({from}) > to ({to})");
        Self { from, to }
    }
}
