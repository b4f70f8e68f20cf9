//! Mock portal over HTTP.
//!
//! Wraps mockito with helpers for the portal endpoints of one dataset.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

use super::test_helpers::{ndjson_body, TEST_DATASET};

/// Builder for mock portal endpoints under `/{dataset}`.
pub struct PortalMockBuilder {
    server: ServerGuard,
    dataset: String,
}

impl PortalMockBuilder {
    /// Creates a mock portal serving [`TEST_DATASET`].
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, dataset: TEST_DATASET.to_string() }
    }

    /// Root URL of the mock server, suitable as the configured portal base URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Dataset base URL the client is expected to derive.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.server.url(), self.dataset)
    }

    fn path(&self, endpoint: &str) -> String {
        format!("/{}/{endpoint}", self.dataset)
    }

    /// Direct access for one-off mocks.
    pub fn server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }

    /// Mocks `GET /head` (or `/finalized-head`).
    pub async fn mock_head(&mut self, finalized: bool, number: u64) -> Mock {
        let path = self.path(if finalized { "finalized-head" } else { "head" });
        self.server
            .mock("GET", path.as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "number": number, "hash": format!("0x{number:064x}") }).to_string())
            .create_async()
            .await
    }

    /// Mocks a head endpoint answering with a bare status.
    pub async fn mock_head_status(&mut self, finalized: bool, status: usize, body: &str) -> Mock {
        let path = self.path(if finalized { "finalized-head" } else { "head" });
        self.server
            .mock("GET", path.as_str())
            .with_status(status)
            .with_body(body)
            .create_async()
            .await
    }

    /// Mocks `GET /metadata`.
    pub async fn mock_metadata(&mut self, start_block: u64) -> Mock {
        let path = self.path("metadata");
        self.server
            .mock("GET", path.as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "dataset": self.dataset, "start_block": start_block, "real_time": true })
                    .to_string(),
            )
            .create_async()
            .await
    }

    /// Mocks a stream page for requests starting at `from_block`.
    pub async fn mock_stream(
        &mut self,
        finalized: bool,
        from_block: u64,
        records: &[Value],
    ) -> Mock {
        let path = self.path(if finalized { "finalized-stream" } else { "stream" });
        self.server
            .mock("POST", path.as_str())
            .match_body(Matcher::PartialJson(json!({ "fromBlock": from_block })))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(ndjson_body(records))
            .create_async()
            .await
    }

    /// Mocks a stream endpoint answering every request with `status`.
    pub async fn mock_stream_status(&mut self, finalized: bool, status: usize, body: &str) -> Mock {
        let path = self.path(if finalized { "finalized-stream" } else { "stream" });
        self.server
            .mock("POST", path.as_str())
            .with_status(status)
            .with_body(body)
            .create_async()
            .await
    }
}
