//! Block identifier parsing for `eth_getBlockByNumber` style parameters.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unsupported block tag: {0}")]
    UnsupportedTag(String),
}

/// Block reference as it appears in a JSON-RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Tag(BlockTag),
}

/// Standard Ethereum block tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Earliest,
    /// The portal has no pending block; resolving it always fails.
    Pending,
    Safe,
    Finalized,
}

pub struct BlockParameter;

impl BlockParameter {
    /// Parses a block parameter.
    ///
    /// Accepts the five standard tags, `0x`-prefixed hex quantities and plain decimals.
    ///
    /// # Examples
    /// ```
    /// use portal_core::utils::block_param::{BlockParameter, BlockRef, BlockTag};
    ///
    /// assert_eq!(BlockParameter::parse("latest").unwrap(), BlockRef::Tag(BlockTag::Latest));
    /// assert_eq!(BlockParameter::parse("pending").unwrap(), BlockRef::Tag(BlockTag::Pending));
    /// assert_eq!(BlockParameter::parse("0x10").unwrap(), BlockRef::Number(16));
    /// assert!(BlockParameter::parse("0xzz").is_err());
    /// ```
    ///
    /// # Errors
    /// Returns `ParseError` if the input is not a valid block parameter.
    pub fn parse(param: &str) -> Result<BlockRef, ParseError> {
        match param {
            "latest" => Ok(BlockRef::Tag(BlockTag::Latest)),
            "pending" => Ok(BlockRef::Tag(BlockTag::Pending)),
            "earliest" => Ok(BlockRef::Tag(BlockTag::Earliest)),
            "safe" => Ok(BlockRef::Tag(BlockTag::Safe)),
            "finalized" => Ok(BlockRef::Tag(BlockTag::Finalized)),
            s => {
                if let Some(hex_str) = s.strip_prefix("0x") {
                    Self::parse_hex(hex_str)
                        .map(BlockRef::Number)
                        .ok_or_else(|| ParseError::InvalidHex(s.to_string()))
                } else {
                    s.parse::<u64>()
                        .map(BlockRef::Number)
                        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
                }
            }
        }
    }

    /// Parses bare or `0x`-prefixed hex digits. Empty input is rejected.
    ///
    /// # Examples
    /// ```
    /// use portal_core::utils::block_param::BlockParameter;
    ///
    /// assert_eq!(BlockParameter::parse_hex("0xff"), Some(255));
    /// assert_eq!(BlockParameter::parse_hex("0x"), None);
    /// ```
    #[must_use]
    pub fn parse_hex(s: &str) -> Option<u64> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || s.starts_with('+') {
            return None;
        }
        u64::from_str_radix(s, 16).ok()
    }
}

/// Reads a quantity the portal may send either as hex (`0x1f`) or as a decimal string.
#[must_use]
pub fn parse_quantity(s: &str) -> Option<u64> {
    if s.starts_with("0x") {
        BlockParameter::parse_hex(s)
    } else {
        s.parse().ok()
    }
}

/// Renders a JSON-RPC hex quantity (no leading zeros).
#[must_use]
pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}
