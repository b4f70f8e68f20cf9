//! Batch coalescing of block requests into contiguous portal range queries.
//!
//! # Flow
//!
//! ```text
//! items ──► parse_item ──► Rejected ───────────────► error result
//!               │
//!               ├──► NotCoalescable ───────────────► left to the caller
//!               ▼
//!          metadata (once) ──► failure ────────────► empty map
//!               │
//!          head snapshots (once per tier, concurrent)
//!               │
//!          resolve ──► out of bounds ──────────────► null
//!               │
//!          plan_ranges ──► stream_blocks per group (concurrent)
//!               │
//!               └──► block by number ──► result, or null when absent
//! ```
//!
//! Results are keyed by the position of the item in the batch, so missing or duplicate ids
//! never collide.

pub mod convert;
pub mod params;
pub mod ranges;

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{
    errors::{ErrorKind, GatewayError},
    metrics,
    portal::{
        fields::block_field_selection, HeadSnapshot, PortalApi, PortalBlock, PortalRequest,
        RequestContext, StreamHeadersCallback,
    },
    types::{BlockRange, JsonRpcRequest},
    utils::{BlockRef, BlockTag},
};

pub use convert::to_rpc_block;
pub use params::{parse_item, BlockQuery, ParsedItem};
pub use ranges::{plan_ranges, PlannedItem, RangeGroup, Tier};

/// Per-item outcomes keyed by batch index. Absent indices are the caller's to resolve.
pub type BatchResults = HashMap<usize, Result<Value, GatewayError>>;

/// Routing context of one batch.
#[derive(Clone, Copy, Default)]
pub struct BatchContext<'a> {
    pub chain_id: u64,
    /// Dataset base URL, or `None` when the chain has no dataset.
    pub base_url: Option<&'a str>,
    pub request: Option<&'a RequestContext>,
    /// Receives stream headers from every range request.
    pub on_headers: Option<StreamHeadersCallback<'a>>,
}

/// How one candidate item resolved against metadata and head snapshots.
enum Resolution {
    Planned(PlannedItem),
    Null,
    Failed(GatewayError),
}

/// Answers the coalescable `eth_getBlockByNumber` items of a batch.
pub async fn coalesce_batch_requests<P>(
    portal: &P,
    items: &[JsonRpcRequest],
    ctx: &BatchContext<'_>,
) -> BatchResults
where
    P: PortalApi + ?Sized,
{
    let mut results = BatchResults::new();
    let Some(base_url) = ctx.base_url else {
        return results;
    };
    let default_request = RequestContext::default();
    let request_ctx = ctx.request.unwrap_or(&default_request);

    let mut candidates = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_item(item) {
            ParsedItem::Block(query) => candidates.push((index, query)),
            ParsedItem::Rejected(error) => {
                record_outcome(&mut results, index, Err(error));
            }
            ParsedItem::NotCoalescable => {}
        }
    }
    if candidates.is_empty() {
        return results;
    }

    let metadata = match portal.get_metadata(base_url, request_ctx).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(
                chain_id = ctx.chain_id,
                base_url,
                error = %e,
                "metadata unavailable, skipping batch coalescing"
            );
            return BatchResults::new();
        }
    };
    let start_block = metadata.start_block;

    let needs_latest = candidates.iter().any(|(_, q)| q.block == BlockRef::Tag(BlockTag::Latest));
    let needs_finalized = candidates.iter().any(|(_, q)| {
        matches!(q.block, BlockRef::Tag(BlockTag::Finalized | BlockTag::Safe))
    });

    let (latest, finalized) = futures::join!(
        fetch_head_if(portal, base_url, false, needs_latest, request_ctx),
        fetch_head_if(portal, base_url, true, needs_finalized, request_ctx),
    );

    let mut planned = Vec::new();
    for (index, query) in candidates {
        match resolve(query, index, start_block, latest.as_ref(), finalized.as_ref()) {
            Resolution::Planned(item) => planned.push(item),
            Resolution::Null => record_outcome(&mut results, index, Ok(Value::Null)),
            Resolution::Failed(error) => record_outcome(&mut results, index, Err(error)),
        }
    }

    let full_by_index: HashMap<usize, bool> =
        planned.iter().map(|item| (item.index, item.full_transactions)).collect();
    let number_by_index: HashMap<usize, u64> =
        planned.iter().map(|item| (item.index, item.number)).collect();

    let groups = plan_ranges(&planned);
    debug!(
        chain_id = ctx.chain_id,
        items = planned.len(),
        groups = groups.len(),
        "coalesced batch"
    );

    let fetches = groups.iter().map(|group| {
        let request = range_request(group);
        async move {
            portal
                .stream_blocks(
                    base_url,
                    group.tier.is_finalized(),
                    &request,
                    request_ctx,
                    ctx.on_headers,
                )
                .await
        }
    });
    let outcomes = join_all(fetches).await;

    for (group, outcome) in groups.iter().zip(outcomes) {
        match outcome {
            Ok(blocks) => {
                let by_number: HashMap<u64, &PortalBlock> =
                    blocks.iter().filter_map(|b| b.number().map(|n| (n, b))).collect();
                for &index in &group.members {
                    let block = number_by_index.get(&index).and_then(|n| by_number.get(n));
                    let full = full_by_index.get(&index).copied().unwrap_or(false);
                    let value = block.map_or(Value::Null, |b| to_rpc_block(b, full));
                    record_outcome(&mut results, index, Ok(value));
                }
            }
            Err(GatewayError::MissingData(_)) => {
                for &index in &group.members {
                    record_outcome(&mut results, index, Ok(Value::Null));
                }
            }
            Err(e) => {
                metrics::record_error(&e);
                warn!(
                    chain_id = ctx.chain_id,
                    from_block = group.range.from,
                    to_block = group.range.to,
                    error = %e,
                    "range stream failed, leaving items for per-item handling"
                );
            }
        }
    }

    results
}

/// Answers one block query on its own, surfacing every failure as an error.
///
/// This is the per-item path for items a batch left unresolved and for single requests.
pub async fn fetch_block<P>(
    portal: &P,
    base_url: &str,
    query: BlockQuery,
    ctx: &RequestContext,
) -> Result<Value, GatewayError>
where
    P: PortalApi + ?Sized,
{
    let metadata = portal.get_metadata(base_url, ctx).await?;
    let needs_latest = query.block == BlockRef::Tag(BlockTag::Latest);
    let needs_finalized =
        matches!(query.block, BlockRef::Tag(BlockTag::Finalized | BlockTag::Safe));

    let latest = fetch_head_if(portal, base_url, false, needs_latest, ctx).await;
    let finalized = fetch_head_if(portal, base_url, true, needs_finalized, ctx).await;

    let item = match resolve(query, 0, metadata.start_block, latest.as_ref(), finalized.as_ref()) {
        Resolution::Planned(item) => item,
        Resolution::Null => return Ok(Value::Null),
        Resolution::Failed(error) => return Err(error),
    };

    let group = RangeGroup {
        tier: item.tier,
        range: BlockRange::new(item.number, item.number),
        full_transactions: item.full_transactions,
        members: vec![0],
    };
    let blocks = match portal
        .stream_blocks(base_url, item.tier.is_finalized(), &range_request(&group), ctx, None)
        .await
    {
        Ok(blocks) => blocks,
        Err(GatewayError::MissingData(_)) => return Ok(Value::Null),
        Err(e) => return Err(e),
    };

    Ok(blocks
        .iter()
        .find(|block| block.number() == Some(item.number))
        .map_or(Value::Null, |block| to_rpc_block(block, item.full_transactions)))
}

async fn fetch_head_if<P>(
    portal: &P,
    base_url: &str,
    finalized: bool,
    needed: bool,
    ctx: &RequestContext,
) -> Option<Result<HeadSnapshot, GatewayError>>
where
    P: PortalApi + ?Sized,
{
    if !needed {
        return None;
    }
    Some(portal.fetch_head(base_url, finalized, ctx).await)
}

fn resolve(
    query: BlockQuery,
    index: usize,
    start_block: u64,
    latest: Option<&Result<HeadSnapshot, GatewayError>>,
    finalized: Option<&Result<HeadSnapshot, GatewayError>>,
) -> Resolution {
    let (number, tier, upper_bound) = match query.block {
        BlockRef::Number(n) => {
            // Numbers never cost a head fetch; they are bounded only by a head already known.
            let bound = latest.and_then(|head| head.as_ref().ok()).map(|s| s.head.number);
            (n, Tier::Latest, bound)
        }
        BlockRef::Tag(BlockTag::Earliest) => (start_block, Tier::Latest, None),
        BlockRef::Tag(BlockTag::Pending) => {
            return Resolution::Failed(GatewayError::invalid_block_number());
        }
        BlockRef::Tag(BlockTag::Latest) => match snapshot(latest) {
            Ok(snapshot) => (snapshot.head.number, Tier::Latest, None),
            Err(error) => return Resolution::Failed(error),
        },
        BlockRef::Tag(BlockTag::Finalized | BlockTag::Safe) => match snapshot(finalized) {
            Ok(snapshot) => {
                let tier =
                    if snapshot.finalized_available { Tier::Finalized } else { Tier::Latest };
                (snapshot.head.number, tier, None)
            }
            Err(error) => return Resolution::Failed(error),
        },
    };

    if number < start_block || upper_bound.is_some_and(|head| number > head) {
        return Resolution::Null;
    }

    Resolution::Planned(PlannedItem {
        index,
        number,
        tier,
        full_transactions: query.full_transactions,
    })
}

/// A head that could not be resolved reads as an invalid block number unless the portal
/// gave a more specific reason.
fn snapshot(
    head: Option<&Result<HeadSnapshot, GatewayError>>,
) -> Result<&HeadSnapshot, GatewayError> {
    match head {
        Some(Ok(snapshot)) => Ok(snapshot),
        Some(Err(error)) if error.kind() != ErrorKind::ServerError => Err(error.clone()),
        _ => Err(GatewayError::invalid_block_number()),
    }
}

fn range_request(group: &RangeGroup) -> PortalRequest {
    let mut request = PortalRequest::range(group.range.from, Some(group.range.to));
    request.include_all_blocks = Some(true);
    request.fields = Some(block_field_selection(group.full_transactions));
    request.transactions = Some(vec![Value::Object(serde_json::Map::new())]);
    request
}

fn record_outcome(results: &mut BatchResults, index: usize, outcome: Result<Value, GatewayError>) {
    let status = match &outcome {
        Ok(Value::Null) => "null",
        Ok(_) => "ok",
        Err(_) => "error",
    };
    metrics::record_batch_item(status);
    results.insert(index, outcome);
}
