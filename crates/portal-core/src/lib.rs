//! # Portal Core
//!
//! Core library of a JSON-RPC gateway that answers Ethereum block queries from a
//! range-oriented block-streaming service (the portal) serving NDJSON over HTTP.
//!
//! - **[`portal`]**: the upstream client. Head lookups with finalized fallback, NDJSON range
//!   streaming with truncation resume, unknown-field negotiation, metadata caching and a
//!   per-host circuit breaker.
//!
//! - **[`batch`]**: turns a JSON-RPC batch of `eth_getBlockByNumber` calls into the minimum
//!   number of contiguous range queries and reassembles per-item results.
//!
//! - **[`errors`]**: the closed error taxonomy every component reports through.
//!
//! - **[`config`]**: layered configuration (defaults, TOML file, environment).
//!
//! - **[`metrics`]**: counters and histograms recorded through the `metrics` facade.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    coalesce_batch_requests               │
//! │   parse_item ─► resolve ─► plan_ranges ─► to_rpc_block   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ PortalApi
//! ┌────────────────────────────▼─────────────────────────────┐
//! │                       PortalClient                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ CircuitBreak │  │ Field        │  │ Metadata cache │  │
//! │  │ (per host)   │  │ negotiation  │  │ (TTL + SWR)    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! │                   ┌───────────────┐                      │
//! │                   │ NdjsonDecoder │                      │
//! │                   └───────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod portal;
pub mod types;
pub mod utils;

pub use errors::{ErrorKind, GatewayError};
