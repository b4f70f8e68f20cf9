//! Newline-delimited JSON decoding with size ceilings.
//!
//! [`NdjsonDecoder`] is a pull-based line splitter: chunks are pushed as they arrive and every
//! completed line is parsed immediately, so memory stays bounded by the longest line rather
//! than the whole body. [`decode_stream`] drives a decoder over an async byte stream and
//! returns every record once the stream is exhausted.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;

use crate::errors::GatewayError;

/// Size ceilings enforced while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdjsonLimits {
    /// Maximum bytes in one line, excluding its terminator.
    pub max_line_bytes: usize,
    /// Maximum bytes consumed from the stream in total.
    pub max_bytes: usize,
}

impl Default for NdjsonLimits {
    fn default() -> Self {
        Self { max_line_bytes: 8 * 1024 * 1024, max_bytes: 64 * 1024 * 1024 }
    }
}

#[derive(Error, Debug)]
pub enum NdjsonError {
    #[error("ndjson line at offset {offset} exceeds {limit} bytes")]
    LineTooLong { offset: usize, limit: usize },

    #[error("ndjson body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid ndjson line at offset {offset}: {source}")]
    Parse {
        offset: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("ndjson stream failed: {0}")]
    Stream(String),
}

impl From<NdjsonError> for GatewayError {
    fn from(err: NdjsonError) -> Self {
        GatewayError::ServerError(err.to_string())
    }
}

/// Incremental NDJSON decoder.
#[derive(Debug)]
pub struct NdjsonDecoder {
    limits: NdjsonLimits,
    /// Bytes of the current, not yet terminated line.
    pending: Vec<u8>,
    /// Stream offset of the first byte in `pending`.
    line_offset: usize,
    consumed: usize,
    records: Vec<Value>,
}

impl NdjsonDecoder {
    #[must_use]
    pub fn new(limits: NdjsonLimits) -> Self {
        Self { limits, pending: Vec::new(), line_offset: 0, consumed: 0, records: Vec::new() }
    }

    /// Feeds one chunk, parsing every line it completes.
    ///
    /// # Errors
    ///
    /// Returns an error if a size ceiling is crossed or a completed line is not valid JSON.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), NdjsonError> {
        self.consumed += chunk.len();
        if self.consumed > self.limits.max_bytes {
            return Err(NdjsonError::TooLarge { limit: self.limits.max_bytes });
        }

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            self.complete_line()?;
            self.line_offset += 1;
            rest = &rest[pos + 1..];
        }

        self.pending.extend_from_slice(rest);
        self.check_line_length()?;
        Ok(())
    }

    /// Ends the stream, parsing a final unterminated line if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailing line is not valid JSON.
    pub fn finish(mut self) -> Result<Vec<Value>, NdjsonError> {
        if !self.pending.is_empty() {
            self.complete_line()?;
        }
        Ok(self.records)
    }

    /// Total bytes pushed so far.
    #[must_use]
    pub fn bytes_consumed(&self) -> usize {
        self.consumed
    }

    /// Number of records decoded so far.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn check_line_length(&self) -> Result<(), NdjsonError> {
        if content_len(&self.pending) > self.limits.max_line_bytes {
            return Err(NdjsonError::LineTooLong {
                offset: self.line_offset,
                limit: self.limits.max_line_bytes,
            });
        }
        Ok(())
    }

    fn complete_line(&mut self) -> Result<(), NdjsonError> {
        self.check_line_length()?;

        let line = std::mem::take(&mut self.pending);
        let offset = self.line_offset;
        self.line_offset += line.len();

        let content = &line[..content_len(&line)];
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let value = serde_json::from_slice(content)
            .map_err(|source| NdjsonError::Parse { offset, source })?;
        self.records.push(value);
        Ok(())
    }
}

/// Length of a line without a trailing carriage return.
fn content_len(line: &[u8]) -> usize {
    match line.last() {
        Some(b'\r') => line.len() - 1,
        _ => line.len(),
    }
}

/// Decodes a whole byte stream into its JSON records.
///
/// # Errors
///
/// Returns an error if the stream fails, a ceiling is crossed, or a line is malformed.
pub async fn decode_stream<S, E>(stream: S, limits: NdjsonLimits) -> Result<Vec<Value>, NdjsonError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    futures::pin_mut!(stream);
    let mut decoder = NdjsonDecoder::new(limits);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| NdjsonError::Stream(e.to_string()))?;
        decoder.push(&chunk)?;
    }

    let bytes = decoder.bytes_consumed();
    let records = decoder.finish()?;
    crate::metrics::record_ndjson(records.len(), bytes);
    Ok(records)
}
