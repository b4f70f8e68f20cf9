//! Conversion of portal block records into Ethereum JSON-RPC block objects.

use serde_json::{Map, Value};

use crate::{portal::PortalBlock, utils::format_quantity};

const HEADER_QUANTITIES: &[&str] = &[
    "number",
    "timestamp",
    "size",
    "gasLimit",
    "gasUsed",
    "difficulty",
    "totalDifficulty",
    "baseFeePerGas",
    "blobGasUsed",
    "excessBlobGas",
];

const TRANSACTION_QUANTITIES: &[&str] = &[
    "transactionIndex",
    "value",
    "nonce",
    "gas",
    "gasPrice",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
    "type",
    "chainId",
    "v",
    "yParity",
];

/// Builds the `eth_getBlockByNumber` result for `block`.
///
/// With `full_transactions == false` the `transactions` member lists hashes only, whatever
/// the portal sent.
#[must_use]
pub fn to_rpc_block(block: &PortalBlock, full_transactions: bool) -> Value {
    let mut out = Map::with_capacity(block.header.len() + 2);
    for (key, value) in &block.header {
        let converted = if key == "nonce" {
            nonce_data(value)
        } else if HEADER_QUANTITIES.contains(&key.as_str()) {
            quantity(value)
        } else {
            value.clone()
        };
        out.insert(key.clone(), converted);
    }
    out.entry("uncles").or_insert_with(|| Value::Array(Vec::new()));

    let transactions = if full_transactions {
        let block_hash = out.get("hash").cloned().unwrap_or(Value::Null);
        let block_number = out.get("number").cloned().unwrap_or(Value::Null);
        block
            .transactions
            .iter()
            .map(|tx| full_transaction(tx, &block_hash, &block_number))
            .collect()
    } else {
        block.transactions.iter().filter_map(|tx| tx.get("hash").cloned()).collect()
    };
    out.insert("transactions".to_string(), Value::Array(transactions));

    Value::Object(out)
}

fn full_transaction(tx: &Value, block_hash: &Value, block_number: &Value) -> Value {
    let Some(fields) = tx.as_object() else {
        return tx.clone();
    };

    let mut out = Map::with_capacity(fields.len() + 2);
    for (key, value) in fields {
        let converted = if TRANSACTION_QUANTITIES.contains(&key.as_str()) {
            quantity(value)
        } else {
            value.clone()
        };
        out.insert(key.clone(), converted);
    }
    out.insert("blockHash".to_string(), block_hash.clone());
    out.insert("blockNumber".to_string(), block_number.clone());
    Value::Object(out)
}

/// Integers and decimal strings become hex quantities; anything else is kept.
fn quantity(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            n.as_u64().map_or_else(|| value.clone(), |n| Value::String(format_quantity(n)))
        }
        Value::String(s) if !s.starts_with("0x") => s
            .parse::<u64>()
            .map_or_else(|_| value.clone(), |n| Value::String(format_quantity(n))),
        _ => value.clone(),
    }
}

/// The block nonce is 8 bytes of data, not a quantity.
fn nonce_data(value: &Value) -> Value {
    match value.as_u64() {
        Some(n) => Value::String(format!("0x{n:016x}")),
        None => value.clone(),
    }
}
