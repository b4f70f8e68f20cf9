//! Field selection for stream requests and unknown-field negotiation.

use std::collections::{BTreeMap, HashSet};

use super::types::{FieldSelection, PortalRequest};

/// Fields the client may drop when a dataset rejects them as unknown.
pub const NEGOTIABLE_FIELDS: &[&str] = &["authorizationList"];

pub const BLOCK_FIELDS: &[&str] = &[
    "number",
    "hash",
    "parentHash",
    "timestamp",
    "transactionsRoot",
    "receiptsRoot",
    "stateRoot",
    "logsBloom",
    "sha3Uncles",
    "extraData",
    "miner",
    "nonce",
    "mixHash",
    "size",
    "gasLimit",
    "gasUsed",
    "difficulty",
    "totalDifficulty",
    "baseFeePerGas",
];

pub const TRANSACTION_HASH_FIELDS: &[&str] = &["hash", "transactionIndex"];

pub const TRANSACTION_FULL_FIELDS: &[&str] = &[
    "hash",
    "transactionIndex",
    "from",
    "to",
    "value",
    "input",
    "nonce",
    "gas",
    "gasPrice",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
    "type",
    "v",
    "r",
    "s",
    "yParity",
    "chainId",
    "authorizationList",
];

#[must_use]
pub fn is_negotiable_field(field: &str) -> bool {
    NEGOTIABLE_FIELDS.contains(&field)
}

/// Field selection for block queries, with either hash-only or full transactions.
#[must_use]
pub fn block_field_selection(full_transactions: bool) -> FieldSelection {
    let tx_fields =
        if full_transactions { TRANSACTION_FULL_FIELDS } else { TRANSACTION_HASH_FIELDS };

    FieldSelection {
        block: Some(field_map(BLOCK_FIELDS)),
        transaction: Some(field_map(tx_fields)),
        ..Default::default()
    }
}

fn field_map(names: &[&str]) -> BTreeMap<String, bool> {
    names.iter().map(|name| ((*name).to_string(), true)).collect()
}

/// Extracts the field name from a portal diagnostic such as ``unknown field `foo` ``.
#[must_use]
pub fn extract_unknown_field(text: &str) -> Option<String> {
    const MARKER: &str = "unknown field `";

    // ASCII lowercasing keeps byte offsets aligned with the original text.
    let start = text.to_ascii_lowercase().find(MARKER)? + MARKER.len();
    let rest = &text[start..];
    let end = rest.find('`')?;
    let field = &rest[..end];
    (!field.is_empty()).then(|| field.to_string())
}

/// Returns `request` with every unsupported field removed from its field maps.
///
/// Maps left empty are dropped, and so is a `fields` object left with no maps.
#[must_use]
pub fn apply_unsupported_fields(
    request: &PortalRequest,
    unsupported: &HashSet<String>,
) -> PortalRequest {
    let mut next = request.clone();
    if unsupported.is_empty() {
        return next;
    }

    if let Some(fields) = next.fields.take() {
        let filtered = FieldSelection {
            block: filter_field_map(fields.block, unsupported),
            transaction: filter_field_map(fields.transaction, unsupported),
            log: filter_field_map(fields.log, unsupported),
            trace: filter_field_map(fields.trace, unsupported),
            state_diff: filter_field_map(fields.state_diff, unsupported),
        };
        next.fields = (!filtered.is_empty()).then_some(filtered);
    }
    next
}

fn filter_field_map(
    map: Option<BTreeMap<String, bool>>,
    unsupported: &HashSet<String>,
) -> Option<BTreeMap<String, bool>> {
    let mut map = map?;
    map.retain(|key, _| !unsupported.contains(key));
    (!map.is_empty()).then_some(map)
}
