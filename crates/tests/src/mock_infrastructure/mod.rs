//! Mock infrastructure for portal gateway tests.
//!
//! - `PortalMockBuilder`: wraps mockito with portal endpoint helpers
//! - `ScriptedPortal`: in-memory `PortalApi` that records every call
//! - Test helpers for block records and client setup
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{portal_block, PortalMockBuilder};
//!
//! let mut portal = PortalMockBuilder::new().await;
//! portal.mock_stream(false, 5, &[portal_block(5, 1)]).await;
//!
//! // Use portal.base_url() as the dataset base URL
//! ```

pub mod portal_mock;
pub mod test_helpers;

pub use portal_mock::PortalMockBuilder;
pub use scripted_portal::{snapshot, PortalCall, ScriptedPortal};
pub use test_helpers::*;
