use dashmap::{DashMap, DashSet};
use reqwest::{header::ACCEPT, Client, ClientBuilder, Response, StatusCode};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use super::{
    circuit_breaker::{CallOutcome, CircuitBreaker, CircuitBreakerState},
    fields::{apply_unsupported_fields, extract_unknown_field, is_negotiable_field},
    ndjson,
    types::{
        HeadSnapshot, PortalBlock, PortalHead, PortalMetadata, PortalRequest, RequestContext,
        StreamHeaders, StreamHeadersCallback,
    },
};
use crate::{
    config::PortalConfig,
    errors::{GatewayError, ResponseBody},
    metrics,
};

const ENDPOINT_SUFFIXES: &[&str] =
    &["/stream", "/finalized-stream", "/head", "/finalized-head", "/metadata"];

/// Portal endpoints relative to a dataset base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Head,
    FinalizedHead,
    Stream,
    FinalizedStream,
    Metadata,
}

impl Endpoint {
    fn head(finalized: bool) -> Self {
        if finalized {
            Self::FinalizedHead
        } else {
            Self::Head
        }
    }

    fn stream(finalized: bool) -> Self {
        if finalized {
            Self::FinalizedStream
        } else {
            Self::Stream
        }
    }

    /// Path segment, also used as the metrics label.
    fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::FinalizedHead => "finalized-head",
            Self::Stream => "stream",
            Self::FinalizedStream => "finalized-stream",
            Self::Metadata => "metadata",
        }
    }

    fn accept(self) -> &'static str {
        match self {
            Self::Stream | Self::FinalizedStream => "application/x-ndjson",
            _ => "application/json",
        }
    }
}

#[derive(Debug, Clone)]
struct CachedMetadata {
    data: Arc<PortalMetadata>,
    fetched_at: Instant,
}

/// Blocks from one stream request, and the tier that actually served them.
struct StreamPage {
    blocks: Vec<PortalBlock>,
    finalized: bool,
}

/// HTTP client for the portal.
///
/// Every operation is scoped to a dataset base URL. Metadata, the unsupported-field set and
/// the circuit breaker are kept per base URL and shared by all clones of the client.
#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    config: Arc<PortalConfig>,
    metadata: Arc<DashMap<String, CachedMetadata>>,
    metadata_refreshing: Arc<DashSet<String>>,
    unsupported_fields: Arc<DashMap<String, HashSet<String>>>,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl PortalClient {
    /// Creates a client with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(config: PortalConfig) -> Result<Self, GatewayError> {
        let http = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("portal-gateway/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                GatewayError::ServerError(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            http,
            config: Arc::new(config),
            metadata: Arc::new(DashMap::new()),
            metadata_refreshing: Arc::new(DashSet::new()),
            unsupported_fields: Arc::new(DashMap::new()),
            breakers: Arc::new(DashMap::new()),
        })
    }

    /// Derives the base URL of `dataset` from the configured portal URL.
    ///
    /// A `{dataset}` placeholder is substituted; a base that already ends with the dataset
    /// name is kept; otherwise the dataset is appended as a path segment.
    #[must_use]
    pub fn build_dataset_base_url(&self, dataset: &str) -> String {
        let base = normalize_portal_base_url(&self.config.base_url);
        if base.contains("{dataset}") {
            return normalize_portal_base_url(&base.replace("{dataset}", dataset));
        }
        if base.to_lowercase().ends_with(&format!("/{}", dataset.to_lowercase())) {
            return base;
        }
        normalize_portal_base_url(&format!("{base}/{dataset}"))
    }

    /// Fetches the latest or finalized head.
    ///
    /// A 404 from `/finalized-head` means the dataset has no finality concept; the latest
    /// head is returned instead with `finalized_available == false`.
    ///
    /// # Errors
    ///
    /// Returns the mapped error for any other non-200 status, or a transport failure.
    pub async fn fetch_head(
        &self,
        base_url: &str,
        finalized: bool,
        ctx: &RequestContext,
    ) -> Result<HeadSnapshot, GatewayError> {
        if finalized {
            if let Some(head) = self.request_head(base_url, Endpoint::FinalizedHead, ctx).await? {
                return Ok(HeadSnapshot { head, finalized_available: true });
            }
            metrics::record_finalized_fallback();
            warn!(
                endpoint = Endpoint::FinalizedHead.as_str(),
                status = 404,
                "finalized head not found, falling back to non-finalized"
            );
        }

        let head = self
            .request_head(base_url, Endpoint::head(false), ctx)
            .await?
            .ok_or_else(|| GatewayError::MissingData("block not found".to_string()))?;
        Ok(HeadSnapshot { head, finalized_available: false })
    }

    /// `Ok(None)` only for a 404 on the finalized endpoint.
    async fn request_head(
        &self,
        base_url: &str,
        endpoint: Endpoint,
        ctx: &RequestContext,
    ) -> Result<Option<PortalHead>, GatewayError> {
        let resp = self.send(base_url, endpoint, None, ctx).await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND && endpoint == Endpoint::FinalizedHead {
            return Ok(None);
        }
        if status != StatusCode::OK {
            return Err(GatewayError::from_status(status.as_u16(), &read_body(resp).await));
        }

        let head = resp.json::<PortalHead>().await.map_err(|e| GatewayError::from_transport(&e))?;
        Ok(Some(head))
    }

    /// Streams the blocks of `request`.
    ///
    /// Unknown negotiable fields are stripped and the request retried. When the request asks
    /// for a closed range of every block, a response that stops short of `to_block` is resumed
    /// from the block after the last one received; a resume that makes no progress fails with
    /// "portal stream interrupted". `on_headers` sees the stream headers of every attempt.
    ///
    /// # Errors
    ///
    /// Returns the mapped error of the first failing attempt, an `unsupported_field` error for
    /// a non-negotiable unknown field, or a `server_error` when negotiation or resuming gives up.
    pub async fn stream_blocks(
        &self,
        base_url: &str,
        finalized: bool,
        request: &PortalRequest,
        ctx: &RequestContext,
        on_headers: Option<StreamHeadersCallback<'_>>,
    ) -> Result<Vec<PortalBlock>, GatewayError> {
        let first = self.stream_once(base_url, finalized, request, ctx, on_headers).await?;
        let mut blocks = first.blocks;

        let Some(to_block) = request.to_block else {
            return Ok(blocks);
        };
        if !request.requires_continuity() {
            return Ok(blocks);
        }

        let mut resumes = 0;
        loop {
            // A record without a readable number cannot be checked for continuity.
            let Some(last) = blocks.last().and_then(PortalBlock::number) else {
                return Ok(blocks);
            };
            if last >= to_block {
                return Ok(blocks);
            }
            if resumes >= self.config.stream_retry_limit {
                warn!(base_url, last, to_block, resumes, "portal stream resume budget exhausted");
                return Err(GatewayError::stream_interrupted());
            }
            resumes += 1;

            metrics::record_stream_resume();
            warn!(base_url, from_block = last + 1, to_block, "portal stream truncated, resuming");

            let mut next = request.clone();
            next.from_block = last + 1;
            let page = self.stream_once(base_url, first.finalized, &next, ctx, on_headers).await?;

            let before = blocks.len();
            blocks.extend(page.blocks.into_iter().filter(|b| b.number().is_some_and(|n| n > last)));
            if blocks.len() == before {
                warn!(base_url, last, to_block, "portal stream resume made no progress");
                return Err(GatewayError::stream_interrupted());
            }
        }
    }

    /// One stream request, including field negotiation and the finalized fallback.
    async fn stream_once(
        &self,
        base_url: &str,
        finalized: bool,
        request: &PortalRequest,
        ctx: &RequestContext,
        on_headers: Option<StreamHeadersCallback<'_>>,
    ) -> Result<StreamPage, GatewayError> {
        let mut finalized = finalized;
        let mut effective = apply_unsupported_fields(request, &self.unsupported_fields(base_url));
        let mut attempts_left = self.config.negotiation_attempts;

        while attempts_left > 0 {
            attempts_left -= 1;

            let endpoint = Endpoint::stream(finalized);
            let resp = self.send(base_url, endpoint, Some(&effective), ctx).await?;
            let status = resp.status();

            if status == StatusCode::NOT_FOUND && finalized {
                metrics::record_finalized_fallback();
                warn!(
                    endpoint = endpoint.as_str(),
                    status = 404,
                    "finalized stream not found, falling back to non-finalized"
                );
                finalized = false;
                attempts_left += 1;
                continue;
            }

            if status == StatusCode::NO_CONTENT {
                notify_headers(on_headers, &resp);
                return Ok(StreamPage { blocks: Vec::new(), finalized });
            }

            if status == StatusCode::BAD_REQUEST {
                let body = read_body(resp).await;
                if let Some(field) = extract_unknown_field(&body.text) {
                    if !is_negotiable_field(&field) {
                        warn!(base_url, field = %field, "portal rejected non-negotiable field");
                        return Err(GatewayError::UnsupportedField(field));
                    }

                    let unsupported = self.mark_unsupported(base_url, &field);
                    let next = apply_unsupported_fields(request, &unsupported);
                    if next != effective {
                        warn!(
                            base_url,
                            field = %field,
                            "portal does not support field, retrying without it"
                        );
                        effective = next;
                        continue;
                    }
                }
                return Err(GatewayError::from_status(status.as_u16(), &body));
            }

            if status != StatusCode::OK {
                return Err(GatewayError::from_status(status.as_u16(), &read_body(resp).await));
            }

            notify_headers(on_headers, &resp);
            let records =
                ndjson::decode_stream(resp.bytes_stream(), self.config.ndjson_limits()).await?;
            let blocks = records
                .into_iter()
                .map(serde_json::from_value::<PortalBlock>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GatewayError::ServerError(format!("invalid portal block: {e}")))?;

            return Ok(StreamPage { blocks, finalized });
        }

        Err(GatewayError::ServerError("portal field negotiation failed".to_string()))
    }

    /// Returns dataset metadata, cached per base URL.
    ///
    /// A stale entry is served immediately while one background refresh runs; a failed
    /// refresh keeps the stale entry.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when nothing is cached yet.
    pub async fn get_metadata(
        &self,
        base_url: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<PortalMetadata>, GatewayError> {
        let cached = self.metadata.get(base_url).map(|entry| entry.value().clone());
        if let Some(cached) = cached {
            if cached.fetched_at.elapsed() >= self.config.metadata_ttl() {
                self.spawn_metadata_refresh(base_url, ctx);
            }
            return Ok(cached.data);
        }

        let data = Arc::new(self.fetch_metadata(base_url, ctx).await?);
        self.metadata.insert(
            base_url.to_string(),
            CachedMetadata { data: Arc::clone(&data), fetched_at: Instant::now() },
        );
        Ok(data)
    }

    fn spawn_metadata_refresh(&self, base_url: &str, ctx: &RequestContext) {
        if !self.metadata_refreshing.insert(base_url.to_string()) {
            return;
        }

        let client = self.clone();
        let base_url = base_url.to_string();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match client.fetch_metadata(&base_url, &ctx).await {
                Ok(data) => {
                    client.metadata.insert(
                        base_url.clone(),
                        CachedMetadata { data: Arc::new(data), fetched_at: Instant::now() },
                    );
                }
                Err(e) => {
                    warn!(
                        endpoint = Endpoint::Metadata.as_str(),
                        base_url = %base_url,
                        error = %e,
                        "metadata refresh failed"
                    );
                }
            }
            client.metadata_refreshing.remove(&base_url);
        });
    }

    async fn fetch_metadata(
        &self,
        base_url: &str,
        ctx: &RequestContext,
    ) -> Result<PortalMetadata, GatewayError> {
        let resp = match self.send(base_url, Endpoint::Metadata, None, ctx).await {
            Ok(resp) => resp,
            Err(e) => {
                metrics::record_metadata_fetch(0);
                return Err(e);
            }
        };

        let status = resp.status();
        metrics::record_metadata_fetch(status.as_u16());
        if status != StatusCode::OK {
            return Err(GatewayError::from_status(status.as_u16(), &read_body(resp).await));
        }

        let meta =
            resp.json::<PortalMetadata>().await.map_err(|e| GatewayError::from_transport(&e))?;
        info!(
            endpoint = Endpoint::Metadata.as_str(),
            dataset = %meta.dataset,
            real_time = meta.real_time,
            start_block = meta.start_block,
            "portal metadata"
        );
        Ok(meta)
    }

    /// Fields the portal at `base_url` has rejected so far.
    #[must_use]
    pub fn unsupported_fields(&self, base_url: &str) -> HashSet<String> {
        self.unsupported_fields.get(base_url).map(|set| set.value().clone()).unwrap_or_default()
    }

    /// Adds `field` to the unsupported set and returns the updated set.
    fn mark_unsupported(&self, base_url: &str, field: &str) -> HashSet<String> {
        let mut entry = self.unsupported_fields.entry(base_url.to_string()).or_default();
        if entry.insert(field.to_string()) {
            metrics::record_unsupported_field(field);
        }
        entry.value().clone()
    }

    #[must_use]
    pub fn circuit_state(&self, base_url: &str) -> CircuitBreakerState {
        self.breakers
            .get(base_url)
            .map_or(CircuitBreakerState::Closed, |breaker| breaker.get_state())
    }

    fn breaker(&self, base_url: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(base_url.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.config.circuit_breaker_threshold,
                    self.config.circuit_breaker_reset(),
                ))
            })
            .clone()
    }

    /// Sends one request through the breaker and records its outcome.
    async fn send(
        &self,
        base_url: &str,
        endpoint: Endpoint,
        body: Option<&PortalRequest>,
        ctx: &RequestContext,
    ) -> Result<Response, GatewayError> {
        let breaker = self.breaker(base_url);
        if !breaker.can_execute() {
            warn!(endpoint = endpoint.as_str(), base_url, "portal circuit open");
            return Err(GatewayError::Unavailable("portal circuit open".to_string()));
        }

        let url = format!("{base_url}/{}", endpoint.as_str());
        let mut builder = match body {
            Some(body) => self.http.post(&url).json(body),
            None => self.http.get(&url),
        };
        builder = builder.header(ACCEPT, endpoint.accept()).timeout(self.config.timeout());

        if let Some(api_key) = &self.config.api_key {
            builder = builder.header(self.config.api_key_header.as_str(), api_key);
        }
        if let Some(traceparent) = &ctx.traceparent {
            builder = builder.header("traceparent", traceparent);
        }
        if let Some(request_id) = &ctx.request_id {
            builder = builder.header("X-Request-Id", request_id);
        }

        let start = Instant::now();
        match builder.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let elapsed = start.elapsed();
                breaker.record(CallOutcome::from_status(status));
                metrics::record_portal_request(endpoint.as_str(), status, elapsed);
                debug!(
                    endpoint = endpoint.as_str(),
                    status,
                    duration_ms = elapsed.as_millis() as u64,
                    "portal response"
                );
                Ok(resp)
            }
            Err(e) => {
                breaker.record(CallOutcome::Failure);
                metrics::record_portal_request(endpoint.as_str(), 0, start.elapsed());
                warn!(endpoint = endpoint.as_str(), error = %e, "portal error");
                Err(GatewayError::from_transport(&e))
            }
        }
    }
}

fn notify_headers(on_headers: Option<StreamHeadersCallback<'_>>, resp: &Response) {
    if let Some(callback) = on_headers {
        callback(&StreamHeaders::from_headers(resp.headers()));
    }
}

async fn read_body(resp: Response) -> ResponseBody {
    match resp.text().await {
        Ok(text) => ResponseBody::from_text(&text),
        Err(e) => ResponseBody::unreadable(&e.to_string()),
    }
}

/// Trims whitespace and one trailing `/`, then strips one trailing endpoint path.
#[must_use]
pub fn normalize_portal_base_url(raw: &str) -> String {
    let mut base = raw.trim();
    if let Some(stripped) = base.strip_suffix('/') {
        base = stripped;
    }
    for suffix in ENDPOINT_SUFFIXES {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped;
            break;
        }
    }
    base.to_string()
}
