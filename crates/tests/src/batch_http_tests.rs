//! Coalescer through the real portal client against a mock portal.

use mockito::Matcher;
use portal_core::{
    batch::{coalesce_batch_requests, BatchContext},
    types::{JsonRpcRequest, JsonRpcResponse},
    GatewayError,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::mock_infrastructure::{
    portal_block, test_client, test_portal_config, PortalMockBuilder, TEST_DATASET,
};

fn get_block(id: u64, tag: &str, full: bool) -> JsonRpcRequest {
    JsonRpcRequest::new("eth_getBlockByNumber", Some(json!([tag, full])), json!(id))
}

#[tokio::test]
async fn test_batch_served_by_single_range_request() {
    let mut portal = PortalMockBuilder::new().await;
    let metadata = portal.mock_metadata(0).await;
    let path = format!("/{TEST_DATASET}/stream");
    let stream = portal
        .server()
        .mock("POST", path.as_str())
        .match_body(Matcher::PartialJson(json!({
            "type": "evm",
            "fromBlock": 10,
            "toBlock": 12,
            "includeAllBlocks": true,
        })))
        .with_status(200)
        .with_body(
            [portal_block(10, 1), portal_block(11, 0), portal_block(12, 2)]
                .iter()
                .map(|b| format!("{b}\n"))
                .collect::<String>(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = test_client(test_portal_config(&portal.url()));
    let base_url = client.build_dataset_base_url(TEST_DATASET);
    let items = [get_block(1, "0xc", false), get_block(2, "0xa", true), get_block(3, "0xb", false)];
    let ctx = BatchContext { chain_id: 1, base_url: Some(&base_url), ..BatchContext::default() };

    let results = coalesce_batch_requests(&client, &items, &ctx).await;

    assert_eq!(results.len(), 3);
    let responses: Vec<Value> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let response = JsonRpcResponse::from_outcome(&results[&index], item.id.clone());
            serde_json::to_value(response).unwrap()
        })
        .collect();

    assert_eq!(responses[0]["result"]["number"], "0xc");
    assert_eq!(responses[0]["result"]["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(
        responses[1]["result"]["transactions"][0]["from"],
        "0x0000000000000000000000000000000000000001"
    );
    assert_eq!(responses[1]["result"]["transactions"][0]["value"], "0x3e8");
    assert_eq!(responses[1]["result"]["nonce"], "0x0000000000000000");
    assert_eq!(responses[2]["result"]["uncles"], json!([]));
    assert_eq!(responses[2]["id"], 3);

    metadata.assert_async().await;
    stream.assert_async().await;
}

#[tokio::test]
async fn test_unavailable_range_left_for_caller() {
    let mut portal = PortalMockBuilder::new().await;
    portal.mock_metadata(0).await;
    portal.mock_stream_status(false, 503, "").await;

    let client = test_client(test_portal_config(&portal.url()));
    let base_url = client.build_dataset_base_url(TEST_DATASET);
    let items = [get_block(1, "0x5", false), get_block(2, "pending", false)];
    let ctx = BatchContext { chain_id: 1, base_url: Some(&base_url), ..BatchContext::default() };

    let results = coalesce_batch_requests(&client, &items, &ctx).await;

    assert!(!results.contains_key(&0));
    assert_eq!(results[&1], Err(GatewayError::invalid_block_number()));
}

#[tokio::test]
async fn test_portal_404_on_range_reads_as_null() {
    let mut portal = PortalMockBuilder::new().await;
    portal.mock_metadata(0).await;
    portal.mock_stream_status(false, 404, "").await;

    let client = test_client(test_portal_config(&portal.url()));
    let base_url = client.build_dataset_base_url(TEST_DATASET);
    let items = [get_block(7, "0x5", false)];
    let ctx = BatchContext { chain_id: 1, base_url: Some(&base_url), ..BatchContext::default() };

    let results = coalesce_batch_requests(&client, &items, &ctx).await;

    let response = JsonRpcResponse::from_outcome(&results[&0], Arc::new(json!(7)));
    assert_eq!(response.result, Some(Value::Null));
    assert!(response.error.is_none());
}
