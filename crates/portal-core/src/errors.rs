use serde_json::{json, Value};
use thiserror::Error;

/// Classification of gateway errors.
///
/// Every failure the core produces lands in exactly one of these kinds. The JSON-RPC front end
/// maps kinds to wire codes through [`GatewayError::rpc_code`] and [`GatewayError::http_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller supplied malformed parameters, or the portal rejected the query shape.
    InvalidParams,
    /// The portal rejected our credentials (401/403).
    Unauthorized,
    /// The portal does not have the requested data (404).
    MissingData,
    /// The requested range was reorganized away (409).
    Conflict,
    /// The portal throttled us (429).
    RateLimited,
    /// The portal is down, timed out, or the circuit breaker is open.
    Unavailable,
    /// Anything else: unmapped statuses, transport failures, broken streams.
    ServerError,
    /// The portal does not know a field and it is not safe to strip it.
    UnsupportedField,
}

impl ErrorKind {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::Unauthorized => "unauthorized",
            Self::MissingData => "missing_data",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::ServerError => "server_error",
            Self::UnsupportedField => "unsupported_field",
        }
    }
}

/// Errors surfaced by the portal access layer and the batch coalescer.
///
/// Errors are categorized once, where they originate, and are never re-wrapped afterwards.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("{message}")]
    InvalidParams { message: String, data: Option<Value> },

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    MissingData(String),

    /// Carries the `previousBlocks` the portal reports as reorganized away, when present.
    #[error("conflict")]
    Conflict { previous_blocks: Option<Vec<Value>> },

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    ServerError(String),

    #[error("portal does not support field `{0}`")]
    UnsupportedField(String),
}

/// A portal error body read once: raw text plus its JSON interpretation when it parsed.
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    pub text: String,
    pub json: Option<Value>,
    pub json_error: Option<String>,
}

impl ResponseBody {
    const UNAVAILABLE: &'static str = "response body unavailable";

    /// Builds a diagnostic body from the raw response text.
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        let (json, json_error) = if raw.is_empty() {
            (None, None)
        } else {
            match serde_json::from_str::<Value>(raw) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e.to_string())),
            }
        };

        let resolved = if raw.is_empty() { Self::UNAVAILABLE } else { raw };
        let text = match &json_error {
            Some(err) => format!("{resolved} (json parse error: {err})"),
            None => resolved.to_string(),
        };

        Self { text, json, json_error }
    }

    /// Body used when reading the response itself failed.
    #[must_use]
    pub fn unreadable(reason: &str) -> Self {
        Self { text: format!("{}: {reason}", Self::UNAVAILABLE), json: None, json_error: None }
    }
}

impl GatewayError {
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams { message: message.into(), data: None }
    }

    #[must_use]
    pub fn invalid_block_number() -> Self {
        Self::invalid_params("invalid block number")
    }

    #[must_use]
    pub fn stream_interrupted() -> Self {
        Self::ServerError("portal stream interrupted".to_string())
    }

    /// Maps a non-success portal status into the taxonomy.
    ///
    /// The mapping is deterministic: 400 folds the raw body into the message, 409 extracts
    /// `previousBlocks` when the body carries them as an array.
    #[must_use]
    pub fn from_status(status: u16, body: &ResponseBody) -> Self {
        match status {
            400 => Self::InvalidParams {
                message: format!("invalid portal response: {}", body.text),
                data: body.json_error.as_ref().map(|e| json!({ "jsonError": e })),
            },
            401 | 403 => Self::Unauthorized,
            404 => Self::MissingData("block not found".to_string()),
            409 => Self::Conflict { previous_blocks: extract_previous_blocks(body.json.as_ref()) },
            429 => Self::RateLimited("Too Many Requests".to_string()),
            503 => Self::Unavailable("unavailable".to_string()),
            _ => Self::ServerError("server error".to_string()),
        }
    }

    /// Normalizes a transport failure.
    ///
    /// Timeouts are `unavailable`; everything else is `server_error` with the original
    /// error text preserved behind a coarse category.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Unavailable("portal request timed out".to_string());
        }

        let category = if error.is_connect() {
            "connection failed"
        } else if error.is_body() {
            "response body error"
        } else if error.is_decode() {
            "response decode error"
        } else if error.is_request() {
            "request failed"
        } else {
            "network error"
        };

        Self::ServerError(format!("{category}: {error}"))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::MissingData(_) => ErrorKind::MissingData,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::ServerError(_) => ErrorKind::ServerError,
            Self::UnsupportedField(_) => ErrorKind::UnsupportedField,
        }
    }

    /// JSON-RPC error code for this error.
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidParams => -32602,
            ErrorKind::Unauthorized => -32016,
            ErrorKind::MissingData => -32001,
            ErrorKind::RateLimited => -32005,
            ErrorKind::Unavailable => -32002,
            ErrorKind::Conflict | ErrorKind::ServerError | ErrorKind::UnsupportedField => -32603,
        }
    }

    /// HTTP status a single (non-batch) JSON-RPC response should carry.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidParams => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::MissingData => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Unavailable => 503,
            ErrorKind::ServerError | ErrorKind::UnsupportedField => 502,
        }
    }

    /// Structured payload for the JSON-RPC `error.data` member.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::InvalidParams { data, .. } => data.clone(),
            Self::Conflict { previous_blocks: Some(blocks) } => {
                Some(json!({ "previousBlocks": blocks }))
            }
            Self::UnsupportedField(field) => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

fn extract_previous_blocks(payload: Option<&Value>) -> Option<Vec<Value>> {
    payload?.get("previousBlocks")?.as_array().cloned()
}
