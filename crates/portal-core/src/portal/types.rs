//! Wire types exchanged with the portal.

use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const FINALIZED_HEAD_NUMBER_HEADER: &str = "x-sqd-finalized-head-number";
pub const FINALIZED_HEAD_HASH_HEADER: &str = "x-sqd-finalized-head-hash";

/// Head snapshot of one tier of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalHead {
    pub number: u64,
    pub hash: String,
}

/// Result of [`super::PortalClient::fetch_head`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadSnapshot {
    pub head: PortalHead,
    /// `false` when the finalized tier was requested but the dataset has no finality concept.
    pub finalized_available: bool,
}

/// Dataset bounds and liveness, as reported by `/metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalMetadata {
    pub dataset: String,
    #[serde(default, deserialize_with = "lenient_block_number")]
    pub start_block: u64,
    #[serde(default)]
    pub real_time: bool,
}

/// Anything that is not a non-negative integer reads as block 0.
fn lenient_block_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_u64().unwrap_or(0))
}

/// Field selection maps of a stream request. Keys are portal field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<BTreeMap<String, bool>>,
}

impl FieldSelection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
            && self.transaction.is_none()
            && self.log.is_none()
            && self.trace.is_none()
            && self.state_diff.is_none()
    }
}

fn default_query_type() -> String {
    "evm".to_string()
}

/// Body of a `/stream` or `/finalized-stream` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    #[serde(rename = "type", default = "default_query_type")]
    pub query_type: String,
    pub from_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_all_blocks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diffs: Option<Vec<Value>>,
}

impl PortalRequest {
    /// Request for the inclusive range `from_block..=to_block`.
    #[must_use]
    pub fn range(from_block: u64, to_block: Option<u64>) -> Self {
        Self {
            query_type: default_query_type(),
            from_block,
            to_block,
            include_all_blocks: None,
            fields: None,
            logs: None,
            transactions: None,
            traces: None,
            state_diffs: None,
        }
    }

    #[must_use]
    pub fn has_item_filters(&self) -> bool {
        self.logs.is_some()
            || self.transactions.is_some()
            || self.traces.is_some()
            || self.state_diffs.is_some()
    }

    /// Whether the response must cover every block up to `to_block`.
    ///
    /// Filtered queries only return blocks with matching items, so gaps are expected there
    /// unless `includeAllBlocks` is set.
    #[must_use]
    pub fn requires_continuity(&self) -> bool {
        self.to_block.is_some()
            && (self.include_all_blocks == Some(true) || !self.has_item_filters())
    }
}

/// One block record from an NDJSON stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalBlock {
    #[serde(default)]
    pub header: Map<String, Value>,
    #[serde(default)]
    pub transactions: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortalBlock {
    /// Block number from the header, if the portal sent one we can read.
    #[must_use]
    pub fn number(&self) -> Option<u64> {
        match self.header.get("number")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => crate::utils::parse_quantity(s),
            _ => None,
        }
    }
}

/// Finalized-head hints a stream response may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeaders {
    pub finalized_head_number: Option<String>,
    pub finalized_head_hash: Option<String>,
}

impl StreamHeaders {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            finalized_head_number: read(FINALIZED_HEAD_NUMBER_HEADER),
            finalized_head_hash: read(FINALIZED_HEAD_HASH_HEADER),
        }
    }
}

/// Callback receiving the stream headers of every attempt.
pub type StreamHeadersCallback<'a> = &'a (dyn Fn(&StreamHeaders) + Send + Sync);

/// Trace correlation forwarded on every outbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub traceparent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self { traceparent: None, request_id: Some(request_id.into()) }
    }
}
