//! Batch coalescer tests against a scripted portal.

use parking_lot::Mutex;
use portal_core::{
    batch::{coalesce_batch_requests, fetch_block, BatchContext, BatchResults, BlockQuery},
    portal::{RequestContext, StreamHeaders},
    types::JsonRpcRequest,
    utils::{BlockRef, BlockTag},
    ErrorKind, GatewayError,
};
use serde_json::{json, Value};

use crate::mock_infrastructure::{snapshot, PortalCall, ScriptedPortal};

const BASE_URL: &str = "https://portal.example/datasets/ethereum-mainnet";

fn get_block(id: u64, tag: &str, full: bool) -> JsonRpcRequest {
    JsonRpcRequest::new("eth_getBlockByNumber", Some(json!([tag, full])), json!(id))
}

fn ctx() -> BatchContext<'static> {
    BatchContext { chain_id: 1, base_url: Some(BASE_URL), ..BatchContext::default() }
}

async fn run(portal: &ScriptedPortal, items: &[JsonRpcRequest]) -> BatchResults {
    coalesce_batch_requests(portal, items, &ctx()).await
}

fn result(results: &BatchResults, index: usize) -> &Value {
    match results.get(&index) {
        Some(Ok(value)) => value,
        Some(Err(e)) => panic!("item {index} failed: {e}"),
        None => panic!("item {index} unresolved"),
    }
}

fn error(results: &BatchResults, index: usize) -> &GatewayError {
    match results.get(&index) {
        Some(Err(e)) => e,
        Some(Ok(value)) => panic!("item {index} succeeded: {value}"),
        None => panic!("item {index} unresolved"),
    }
}

fn stream(finalized: bool, from_block: u64, to_block: u64, full: bool) -> PortalCall {
    PortalCall::Stream {
        finalized,
        from_block,
        to_block: Some(to_block),
        full_transactions: full,
    }
}

mod range_planning_tests {
    use super::*;

    #[tokio::test]
    async fn test_contiguous_numbers_share_one_stream() {
        let portal = ScriptedPortal::new();
        let items =
            [get_block(1, "0x7", false), get_block(2, "0x5", false), get_block(3, "0x6", false)];

        let results = run(&portal, &items).await;

        assert_eq!(portal.stream_calls(), vec![stream(false, 5, 7, false)]);
        assert_eq!(result(&results, 0)["number"], "0x7");
        assert_eq!(result(&results, 1)["number"], "0x5");
        assert_eq!(result(&results, 2)["number"], "0x6");
    }

    #[tokio::test]
    async fn test_gap_splits_ranges() {
        let portal = ScriptedPortal::new();
        let items =
            [get_block(1, "0x5", false), get_block(2, "0x6", false), get_block(3, "0x9", false)];

        let results = run(&portal, &items).await;

        let mut calls = portal.stream_calls();
        calls.sort_by_key(|c| match c {
            PortalCall::Stream { from_block, .. } => *from_block,
            _ => 0,
        });
        assert_eq!(calls, vec![stream(false, 5, 6, false), stream(false, 9, 9, false)]);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_full_transactions_win_within_a_range() {
        let portal = ScriptedPortal::new();
        let items =
            [get_block(1, "0x5", false), get_block(2, "0x5", true), get_block(3, "0x6", false)];

        let results = run(&portal, &items).await;

        assert_eq!(portal.stream_calls(), vec![stream(false, 5, 6, true)]);

        let hashes = result(&results, 0)["transactions"].as_array().unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.iter().all(Value::is_string));

        let full = result(&results, 1)["transactions"].as_array().unwrap();
        assert_eq!(full[0]["blockNumber"], "0x5");
        assert_eq!(full[0]["hash"], hashes[0]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_kept_apart() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "0x5", false), get_block(1, "0x6", false)];

        let results = run(&portal, &items).await;

        assert_eq!(result(&results, 0)["number"], "0x5");
        assert_eq!(result(&results, 1)["number"], "0x6");
    }
}

mod tag_resolution_tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_fetched_once() {
        let portal = ScriptedPortal::new();
        let items = [
            get_block(1, "latest", false),
            get_block(2, "latest", true),
            get_block(3, "0x63", false),
        ];

        let results = run(&portal, &items).await;

        assert_eq!(portal.head_calls(false), 1);
        assert_eq!(portal.head_calls(true), 0);
        assert_eq!(portal.stream_calls(), vec![stream(false, 99, 100, true)]);
        assert_eq!(result(&results, 0)["number"], "0x64");
        assert_eq!(result(&results, 2)["number"], "0x63");
    }

    #[tokio::test]
    async fn test_finalized_and_safe_use_finalized_tier() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "finalized", false), get_block(2, "safe", false)];

        let results = run(&portal, &items).await;

        assert_eq!(portal.head_calls(true), 1);
        assert_eq!(portal.stream_calls(), vec![stream(true, 90, 90, false)]);
        assert_eq!(result(&results, 0)["number"], "0x5a");
        assert_eq!(result(&results, 1)["number"], "0x5a");
    }

    #[tokio::test]
    async fn test_finalized_without_finality_streams_latest() {
        let portal = ScriptedPortal::new().with_finalized(Ok(snapshot(95, false)));
        let items = [get_block(1, "finalized", false)];

        let results = run(&portal, &items).await;

        assert_eq!(portal.stream_calls(), vec![stream(false, 95, 95, false)]);
        assert_eq!(result(&results, 0)["number"], "0x5f");
    }

    #[tokio::test]
    async fn test_tiers_are_never_merged() {
        let portal = ScriptedPortal::new().with_latest(Ok(snapshot(91, false)));
        let items = [get_block(1, "finalized", false), get_block(2, "latest", false)];

        run(&portal, &items).await;

        let calls = portal.stream_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&stream(true, 90, 90, false)));
        assert!(calls.contains(&stream(false, 91, 91, false)));
    }

    #[tokio::test]
    async fn test_earliest_is_start_block() {
        let portal = ScriptedPortal::new().with_start_block(12);
        let items = [get_block(1, "earliest", false)];

        let results = run(&portal, &items).await;

        assert_eq!(result(&results, 0)["number"], "0xc");
        assert_eq!(portal.head_calls(false), 0);
    }

    #[tokio::test]
    async fn test_pending_is_invalid_block_number() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "pending", false)];

        let results = run(&portal, &items).await;

        assert_eq!(*error(&results, 0), GatewayError::invalid_block_number());
        assert!(portal.stream_calls().is_empty());
    }

    #[tokio::test]
    async fn test_generic_head_failure_reads_as_invalid_block_number() {
        let portal = ScriptedPortal::new()
            .with_latest(Err(GatewayError::ServerError("head unavailable".to_string())));
        let items = [get_block(1, "latest", false), get_block(2, "0x5", false)];

        let results = run(&portal, &items).await;

        assert_eq!(*error(&results, 0), GatewayError::invalid_block_number());
        assert_eq!(result(&results, 1)["number"], "0x5");
    }

    #[tokio::test]
    async fn test_specific_head_failure_propagates() {
        let portal = ScriptedPortal::new()
            .with_finalized(Err(GatewayError::RateLimited("Too Many Requests".to_string())));
        let items = [get_block(1, "finalized", false)];

        let results = run(&portal, &items).await;

        assert_eq!(error(&results, 0).kind(), ErrorKind::RateLimited);
    }
}

mod bounds_tests {
    use super::*;

    #[tokio::test]
    async fn test_below_start_block_is_null_without_portal_call() {
        let portal = ScriptedPortal::new().with_start_block(100);
        let items = [get_block(1, "0x5", false)];

        let results = run(&portal, &items).await;

        assert_eq!(*result(&results, 0), Value::Null);
        assert!(portal.stream_calls().is_empty());
    }

    #[tokio::test]
    async fn test_above_known_head_is_null() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "latest", false), get_block(2, "0x65", false)];

        let results = run(&portal, &items).await;

        assert_eq!(result(&results, 0)["number"], "0x64");
        assert_eq!(*result(&results, 1), Value::Null);
        assert_eq!(portal.stream_calls(), vec![stream(false, 100, 100, false)]);
    }

    #[tokio::test]
    async fn test_numbers_alone_never_fetch_heads() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "0x1f4", false)];

        let results = run(&portal, &items).await;

        assert_eq!(portal.head_calls(false) + portal.head_calls(true), 0);
        assert_eq!(result(&results, 0)["number"], "0x1f4");
    }

    #[tokio::test]
    async fn test_blocks_absent_from_stream_are_null() {
        let portal = ScriptedPortal::new().with_missing_blocks(&[6]);
        let items =
            [get_block(1, "0x5", false), get_block(2, "0x6", false), get_block(3, "0x7", false)];

        let results = run(&portal, &items).await;

        assert_eq!(result(&results, 0)["number"], "0x5");
        assert_eq!(*result(&results, 1), Value::Null);
        assert_eq!(result(&results, 2)["number"], "0x7");
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_dataset_yields_nothing() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "0x5", false), get_block(2, "nope", false)];
        let ctx = BatchContext { chain_id: 10, ..BatchContext::default() };

        let results = coalesce_batch_requests(&portal, &items, &ctx).await;

        assert!(results.is_empty());
        assert!(portal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_up_front() {
        let portal = ScriptedPortal::new();
        let items = [
            JsonRpcRequest::new("eth_getBlockByNumber", Some(json!({"block": "0x5"})), json!(1)),
            JsonRpcRequest::new("eth_getBlockByNumber", Some(json!(["0x5", false, 1])), json!(2)),
            JsonRpcRequest::new("eth_getBlockByNumber", Some(json!(["0x5", "yes"])), json!(3)),
            get_block(4, "0xzz", false),
        ];

        let results = run(&portal, &items).await;

        assert_eq!(error(&results, 0).to_string(), "invalid params for eth_getBlockByNumber");
        assert_eq!(error(&results, 1).to_string(), "invalid params");
        assert_eq!(error(&results, 2).to_string(), "invalid params");
        assert_eq!(*error(&results, 3), GatewayError::invalid_block_number());
        assert!(portal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_left_to_caller() {
        let portal = ScriptedPortal::new();
        let items = [
            JsonRpcRequest::new("eth_chainId", None, json!(1)),
            JsonRpcRequest::new(
                "eth_getBlockByNumber",
                Some(json!([{"blockHash": "0xabc"}, false])),
                json!(2),
            ),
            get_block(3, "0x5", false),
        ];

        let results = run(&portal, &items).await;

        assert!(!results.contains_key(&0));
        assert!(!results.contains_key(&1));
        assert_eq!(result(&results, 2)["number"], "0x5");
    }

    #[tokio::test]
    async fn test_metadata_failure_abandons_batch() {
        let portal = ScriptedPortal::new()
            .with_metadata_error(GatewayError::Unavailable("unavailable".to_string()));
        let items = [get_block(1, "0x5", false), get_block(2, "pending", false)];

        let results = run(&portal, &items).await;

        assert!(results.is_empty());
        assert_eq!(portal.calls(), vec![PortalCall::Metadata]);
    }

    #[tokio::test]
    async fn test_failed_range_left_unresolved() {
        let portal = ScriptedPortal::new()
            .fail_stream_from(9, GatewayError::ServerError("server error".to_string()));
        let items = [get_block(1, "0x5", false), get_block(2, "0x9", false)];

        let results = run(&portal, &items).await;

        assert_eq!(result(&results, 0)["number"], "0x5");
        assert!(!results.contains_key(&1));
    }

    #[tokio::test]
    async fn test_missing_range_is_null() {
        let portal = ScriptedPortal::new()
            .fail_stream_from(5, GatewayError::MissingData("block not found".to_string()));
        let items = [get_block(1, "0x5", false), get_block(2, "0x6", true)];

        let results = run(&portal, &items).await;

        assert_eq!(*result(&results, 0), Value::Null);
        assert_eq!(*result(&results, 1), Value::Null);
    }

    #[tokio::test]
    async fn test_headers_callback_forwarded_to_ranges() {
        let portal = ScriptedPortal::new();
        let items = [get_block(1, "0x5", false), get_block(2, "0x9", false)];
        let seen = Mutex::new(Vec::new());
        let on_headers = |headers: &StreamHeaders| seen.lock().push(headers.clone());
        let request = RequestContext::with_request_id("batch-1");
        let ctx = BatchContext {
            chain_id: 1,
            base_url: Some(BASE_URL),
            request: Some(&request),
            on_headers: Some(&on_headers),
        };

        coalesce_batch_requests(&portal, &items, &ctx).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|h| h.finalized_head_number.as_deref() == Some("90")));
    }
}

mod single_item_tests {
    use super::*;

    fn query(block: BlockRef, full_transactions: bool) -> BlockQuery {
        BlockQuery { block, full_transactions }
    }

    #[tokio::test]
    async fn test_fetch_block_by_tag() {
        let portal = ScriptedPortal::new();

        let block = fetch_block(
            &portal,
            BASE_URL,
            query(BlockRef::Tag(BlockTag::Latest), true),
            &RequestContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(block["number"], "0x64");
        assert_eq!(block["transactions"][0]["blockNumber"], "0x64");
        assert_eq!(portal.stream_calls(), vec![stream(false, 100, 100, true)]);
    }

    #[tokio::test]
    async fn test_fetch_block_surfaces_errors() {
        let portal = ScriptedPortal::new()
            .fail_stream_from(5, GatewayError::Unavailable("unavailable".to_string()));

        let err = fetch_block(
            &portal,
            BASE_URL,
            query(BlockRef::Number(5), false),
            &RequestContext::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_fetch_block_metadata_failure_propagates() {
        let portal = ScriptedPortal::new()
            .with_metadata_error(GatewayError::Unauthorized);

        let err = fetch_block(
            &portal,
            BASE_URL,
            query(BlockRef::Number(5), false),
            &RequestContext::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err, GatewayError::Unauthorized);
    }

    #[tokio::test]
    async fn test_fetch_block_absent_is_null() {
        let portal = ScriptedPortal::new().with_missing_blocks(&[5]);

        let block = fetch_block(
            &portal,
            BASE_URL,
            query(BlockRef::Number(5), false),
            &RequestContext::default(),
        )
        .await
        .unwrap();

        assert_eq!(block, Value::Null);
    }
}
