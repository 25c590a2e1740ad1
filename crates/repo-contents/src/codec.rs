//! Base64 transport encoding for file contents
//!
//! Content always travels base64 encoded, regardless of what the text is.
//! The store wraps encoded content at 60 columns on reads, so decoding
//! ignores ASCII whitespace.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Encode file text for a write request.
pub fn encode_content(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decode the `content` field of a read response back into text.
pub fn decode_content(encoded: &str) -> Result<String> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Decode(format!("content is not UTF-8: {e}")))
}
