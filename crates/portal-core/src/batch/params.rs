//! Parameter validation for coalescable JSON-RPC methods.

use serde_json::Value;

use crate::{
    errors::GatewayError,
    types::JsonRpcRequest,
    utils::{BlockParameter, BlockRef},
};

pub const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";

/// A validated `eth_getBlockByNumber` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockQuery {
    pub block: BlockRef,
    pub full_transactions: bool,
}

/// What the coalescer should do with one batch item.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedItem {
    Block(BlockQuery),
    /// Answer immediately with this error.
    Rejected(GatewayError),
    /// Leave for the per-item path (other methods, hash-addressed blocks).
    NotCoalescable,
}

#[must_use]
pub fn parse_item(request: &JsonRpcRequest) -> ParsedItem {
    if request.method != GET_BLOCK_BY_NUMBER {
        return ParsedItem::NotCoalescable;
    }

    let Some(Value::Array(params)) = &request.params else {
        return ParsedItem::Rejected(GatewayError::invalid_params(format!(
            "invalid params for {GET_BLOCK_BY_NUMBER}"
        )));
    };

    let (block_param, full_param) = match params.as_slice() {
        [block] => (block, None),
        [block, full] => (block, Some(full)),
        _ => return ParsedItem::Rejected(GatewayError::invalid_params("invalid params")),
    };

    let full_transactions = match full_param {
        None => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return ParsedItem::Rejected(GatewayError::invalid_params("invalid params")),
    };

    match parse_block_selector(block_param) {
        Ok(Some(block)) => ParsedItem::Block(BlockQuery { block, full_transactions }),
        Ok(None) => ParsedItem::NotCoalescable,
        Err(e) => ParsedItem::Rejected(e),
    }
}

/// `Ok(None)` for selectors addressing a block by hash.
fn parse_block_selector(value: &Value) -> Result<Option<BlockRef>, GatewayError> {
    match value {
        Value::String(s) => BlockParameter::parse(s)
            .map(Some)
            .map_err(|_| GatewayError::invalid_block_number()),
        Value::Number(n) => n
            .as_u64()
            .map(|n| Some(BlockRef::Number(n)))
            .ok_or_else(GatewayError::invalid_block_number),
        Value::Object(selector) => {
            if selector.contains_key("blockHash") {
                return Ok(None);
            }
            match selector.get("blockNumber") {
                Some(inner @ (Value::String(_) | Value::Number(_))) => parse_block_selector(inner),
                _ => Err(GatewayError::invalid_params("invalid params")),
            }
        }
        _ => Err(GatewayError::invalid_params("invalid params")),
    }
}
