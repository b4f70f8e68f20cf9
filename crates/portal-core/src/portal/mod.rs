//! Portal access layer: head lookups, NDJSON range streaming and metadata.

pub mod circuit_breaker;
pub mod client;
pub mod fields;
pub mod ndjson;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;

pub use circuit_breaker::{CallOutcome, CircuitBreaker, CircuitBreakerState};
pub use client::{normalize_portal_base_url, PortalClient};
pub use ndjson::{NdjsonDecoder, NdjsonError, NdjsonLimits};
pub use types::{
    FieldSelection, HeadSnapshot, PortalBlock, PortalHead, PortalMetadata, PortalRequest,
    RequestContext, StreamHeaders, StreamHeadersCallback,
};

use crate::errors::GatewayError;

/// The portal operations the batch coalescer depends on.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn fetch_head(
        &self,
        base_url: &str,
        finalized: bool,
        ctx: &RequestContext,
    ) -> Result<HeadSnapshot, GatewayError>;

    async fn stream_blocks(
        &self,
        base_url: &str,
        finalized: bool,
        request: &PortalRequest,
        ctx: &RequestContext,
        on_headers: Option<StreamHeadersCallback<'_>>,
    ) -> Result<Vec<PortalBlock>, GatewayError>;

    async fn get_metadata(
        &self,
        base_url: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<PortalMetadata>, GatewayError>;
}

#[async_trait]
impl PortalApi for PortalClient {
    async fn fetch_head(
        &self,
        base_url: &str,
        finalized: bool,
        ctx: &RequestContext,
    ) -> Result<HeadSnapshot, GatewayError> {
        PortalClient::fetch_head(self, base_url, finalized, ctx).await
    }

    async fn stream_blocks(
        &self,
        base_url: &str,
        finalized: bool,
        request: &PortalRequest,
        ctx: &RequestContext,
        on_headers: Option<StreamHeadersCallback<'_>>,
    ) -> Result<Vec<PortalBlock>, GatewayError> {
        PortalClient::stream_blocks(self, base_url, finalized, request, ctx, on_headers).await
    }

    async fn get_metadata(
        &self,
        base_url: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<PortalMetadata>, GatewayError> {
        PortalClient::get_metadata(self, base_url, ctx).await
    }
}
