use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use portal_core::{
    batch::{coalesce_batch_requests, fetch_block, parse_item, BatchContext, ParsedItem},
    config::AppConfig,
    portal::{PortalClient, RequestContext, StreamHeaders},
    types::{JsonRpcRequest, JsonRpcResponse},
    utils::format_quantity,
    GatewayError,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, warn};

const REQUEST_ID_HEADER: &str = "x-request-id";
const TRACEPARENT_HEADER: &str = "traceparent";

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;

const SUPPORTED_METHODS: &[&str] = &["eth_chainId", "eth_blockNumber", "eth_getBlockByNumber"];

/// Shared state of the JSON-RPC front end.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub portal: PortalClient,
}

impl AppState {
    /// Builds the portal client from `config.portal`.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let portal = PortalClient::new(config.portal.clone())?;
        Ok(Self { config: Arc::new(config), portal })
    }
}

/// Where one incoming request is routed: chain, dataset and trace correlation.
struct ChainRoute {
    chain_id: u64,
    base_url: Option<String>,
    ctx: RequestContext,
}

impl ChainRoute {
    fn resolve(state: &AppState, chain_id: u64, headers: &HeaderMap) -> Self {
        let base_url =
            state.config.dataset_for(chain_id).map(|d| state.portal.build_dataset_base_url(d));
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            chain_id,
            base_url,
            ctx: RequestContext {
                traceparent: header(TRACEPARENT_HEADER),
                request_id: header(REQUEST_ID_HEADER),
            },
        }
    }

    fn base_url(&self) -> Result<&str, GatewayError> {
        self.base_url.as_deref().ok_or_else(|| {
            GatewayError::invalid_params(format!("unsupported chain id {}", self.chain_id))
        })
    }
}

/// Creates the JSON-RPC router: `POST /` for the default chain, `POST /{chain_id}` per chain.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_request_body_bytes;

    Router::new()
        .route("/health", get(handle_health))
        .route("/", post(handle_default_chain))
        .route("/{chain_id}", post(handle_chain))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let chains: Vec<Value> = state
        .config
        .chains
        .iter()
        .map(|chain| {
            let base_url = state.portal.build_dataset_base_url(&chain.dataset);
            json!({
                "chainId": chain.chain_id,
                "dataset": chain.dataset,
                "circuit": state.portal.circuit_state(&base_url).as_str(),
            })
        })
        .collect();

    Json(json!({ "status": "ok", "chains": chains }))
}

pub async fn handle_default_chain(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.config.default_chain_id {
        Some(chain_id) => handle_rpc(&state, chain_id, &headers, &body).await,
        None => rpc_error_response(
            StatusCode::NOT_FOUND,
            INVALID_REQUEST,
            "no default chain configured; use /{chain_id}".to_string(),
        ),
    }
}

pub async fn handle_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_rpc(&state, chain_id, &headers, &body).await
}

/// Handles one JSON-RPC payload, a single request object or a batch array.
async fn handle_rpc(state: &AppState, chain_id: u64, headers: &HeaderMap, body: &[u8]) -> Response {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                format!("Parse error: {e}"),
            );
        }
    };

    let route = ChainRoute::resolve(state, chain_id, headers);
    let timeout = state.config.request_timeout();

    let handled = tokio::time::timeout(timeout, async {
        match payload {
            Value::Array(items) => handle_batch(state, &route, items).await,
            single => handle_single(state, &route, single).await,
        }
    })
    .await;

    handled.unwrap_or_else(|_| {
        warn!(chain_id, timeout_secs = timeout.as_secs(), "request timed out");
        let error = GatewayError::Unavailable("request timed out".to_string());
        (
            status_of(&error),
            Json(JsonRpcResponse::from_gateway_error(&error, Arc::new(Value::Null))),
        )
            .into_response()
    })
}

async fn handle_single(state: &AppState, route: &ChainRoute, payload: Value) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                format!("Invalid request: {e}"),
            );
        }
    };

    if !SUPPORTED_METHODS.contains(&request.method.as_str()) {
        let response = method_not_found(&request);
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    }

    match dispatch(state, route, &request).await {
        Ok(result) => Json(JsonRpcResponse::success(result, request.id)).into_response(),
        Err(error) => (
            status_of(&error),
            Json(JsonRpcResponse::from_gateway_error(&error, request.id)),
        )
            .into_response(),
    }
}

/// Answers a batch: coalescable block queries in one pass, everything else per item.
async fn handle_batch(state: &AppState, route: &ChainRoute, items: Vec<Value>) -> Response {
    if items.is_empty() {
        return rpc_error_response(
            StatusCode::BAD_REQUEST,
            INVALID_REQUEST,
            "Invalid Request: empty batch".to_string(),
        );
    }

    let mut responses: Vec<Option<JsonRpcResponse>> = vec![None; items.len()];
    let mut requests = Vec::with_capacity(items.len());
    let mut positions = Vec::with_capacity(items.len());

    for (position, item) in items.into_iter().enumerate() {
        let id = Arc::new(item.get("id").cloned().unwrap_or(Value::Null));
        match serde_json::from_value::<JsonRpcRequest>(item) {
            Ok(request) => {
                requests.push(request);
                positions.push(position);
            }
            Err(_) => {
                responses[position] = Some(JsonRpcResponse::error(
                    INVALID_REQUEST,
                    "Invalid request".to_string(),
                    id,
                ));
            }
        }
    }

    let on_headers = |headers: &StreamHeaders| {
        debug!(
            chain_id = route.chain_id,
            finalized_head_number = ?headers.finalized_head_number,
            "finalized head reported by portal"
        );
    };
    let ctx = BatchContext {
        chain_id: route.chain_id,
        base_url: route.base_url.as_deref(),
        request: Some(&route.ctx),
        on_headers: Some(&on_headers),
    };
    let coalesced = coalesce_batch_requests(&state.portal, &requests, &ctx).await;

    let mut pending = Vec::new();
    for (index, request) in requests.iter().enumerate() {
        match coalesced.get(&index) {
            Some(outcome) => {
                responses[positions[index]] =
                    Some(JsonRpcResponse::from_outcome(outcome, request.id.clone()));
            }
            None => pending.push(index),
        }
    }

    debug!(
        chain_id = route.chain_id,
        items = requests.len(),
        coalesced = coalesced.len(),
        per_item = pending.len(),
        "batch dispatched"
    );

    let fallbacks = join_all(pending.iter().map(|&index| {
        let request = &requests[index];
        async move {
            if SUPPORTED_METHODS.contains(&request.method.as_str()) {
                let outcome = dispatch(state, route, request).await;
                JsonRpcResponse::from_outcome(&outcome, request.id.clone())
            } else {
                method_not_found(request)
            }
        }
    }))
    .await;

    for (index, response) in pending.into_iter().zip(fallbacks) {
        responses[positions[index]] = Some(response);
    }

    let body: Vec<JsonRpcResponse> = responses.into_iter().flatten().collect();
    Json(body).into_response()
}

/// Per-item handling of a supported method.
async fn dispatch(
    state: &AppState,
    route: &ChainRoute,
    request: &JsonRpcRequest,
) -> Result<Value, GatewayError> {
    match request.method.as_str() {
        "eth_chainId" => Ok(Value::String(format_quantity(route.chain_id))),
        "eth_blockNumber" => {
            let snapshot = state.portal.fetch_head(route.base_url()?, false, &route.ctx).await?;
            Ok(Value::String(format_quantity(snapshot.head.number)))
        }
        _ => match parse_item(request) {
            ParsedItem::Block(query) => {
                fetch_block(&state.portal, route.base_url()?, query, &route.ctx).await
            }
            ParsedItem::Rejected(error) => Err(error),
            ParsedItem::NotCoalescable => {
                Err(GatewayError::invalid_params("block hash lookups are not supported"))
            }
        },
    }
}

fn method_not_found(request: &JsonRpcRequest) -> JsonRpcResponse {
    JsonRpcResponse::error(
        METHOD_NOT_FOUND,
        format!("Method not found: {}", request.method),
        request.id.clone(),
    )
}

fn status_of(error: &GatewayError) -> StatusCode {
    StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn rpc_error_response(status: StatusCode, code: i32, message: String) -> Response {
    let response = JsonRpcResponse::error(code, message, Arc::new(Value::Null));
    (status, Json(response)).into_response()
}
