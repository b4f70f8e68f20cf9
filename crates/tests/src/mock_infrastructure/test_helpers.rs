//! Fixtures for portal block records and client setup.

use portal_core::{
    config::PortalConfig,
    portal::{PortalBlock, PortalClient},
};
use serde_json::{json, Value};

pub const TEST_DATASET: &str = "ethereum-mainnet";

/// A block record as the portal streams it: integer quantities, one object per line.
#[must_use]
pub fn portal_block(number: u64, tx_count: u64) -> Value {
    let transactions: Vec<Value> = (0..tx_count)
        .map(|i| {
            json!({
                "transactionIndex": i,
                "hash": format!("0x{:064x}", number * 1000 + i),
                "from": "0x0000000000000000000000000000000000000001",
                "to": "0x0000000000000000000000000000000000000002",
                "value": "1000",
                "input": "0x",
                "nonce": i,
                "gas": 21000,
                "gasPrice": "7",
                "type": 2,
            })
        })
        .collect();

    json!({
        "header": {
            "number": number,
            "hash": format!("0x{number:064x}"),
            "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
            "timestamp": 1_600_000_000 + number,
            "miner": "0x0000000000000000000000000000000000000000",
            "nonce": 0,
            "gasLimit": "30000000",
            "gasUsed": "21000",
            "baseFeePerGas": "7",
        },
        "transactions": transactions,
    })
}

/// Typed version of [`portal_block`].
///
/// # Panics
///
/// Never for records built by [`portal_block`].
#[must_use]
pub fn typed_block(number: u64, tx_count: u64) -> PortalBlock {
    serde_json::from_value(portal_block(number, tx_count)).unwrap()
}

/// Renders records as an NDJSON body.
#[must_use]
pub fn ndjson_body(records: &[Value]) -> String {
    records.iter().map(|record| format!("{record}\n")).collect()
}

/// Portal settings for tests: short timeout, breaker trips after three failures.
#[must_use]
pub fn test_portal_config(base_url: &str) -> PortalConfig {
    PortalConfig {
        timeout_ms: 2_000,
        circuit_breaker_threshold: 3,
        circuit_breaker_reset_ms: 60_000,
        ..PortalConfig::with_base_url(base_url)
    }
}

/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
pub fn test_client(config: PortalConfig) -> PortalClient {
    PortalClient::new(config).unwrap()
}
