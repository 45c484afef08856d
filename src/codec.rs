//! Wire decoder for hub payloads
//!
//! Hub methods deliver book data as a single base64 string containing a
//! raw DEFLATE stream (no zlib or gzip header) of UTF-8 JSON text.

use std::io::Read;

use base64::Engine;
use flate2::read::DeflateDecoder;

use crate::error::{FeedError, Result};

/// Decode a hub payload: base64 -> raw DEFLATE -> UTF-8 text.
pub fn decode_frame(wire: &str) -> Result<String> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(wire)
        .map_err(|e| FeedError::Decode(format!("invalid base64: {}", e)))?;

    let mut inflater = DeflateDecoder::new(compressed.as_slice());
    let mut raw = Vec::new();
    inflater
        .read_to_end(&mut raw)
        .map_err(|e| FeedError::Decode(format!("invalid deflate stream: {}", e)))?;

    String::from_utf8(raw).map_err(|e| FeedError::Decode(format!("invalid utf-8: {}", e)))
}
