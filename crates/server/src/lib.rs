//! JSON-RPC front end over the portal core: routing, single and batch dispatch.

pub mod router;
