//! Parsing helpers shared by the portal client and the batch coalescer.

pub mod block_param;

pub use block_param::{
    format_quantity, parse_quantity, BlockParameter, BlockRef, BlockTag,
    ParseError as BlockParseError,
};
