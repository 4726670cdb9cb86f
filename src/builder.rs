// Request builder for splice
// Turns a region list back into wire bytes and repairs derived headers

use base64::{engine::general_purpose, Engine as _};
use std::ops::Range;
use tracing::debug;

use crate::error::{Result, SpliceError};
use crate::models::{Properties, Request};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Concatenate all regions in order.
///
/// Fails only if a region's recorded offset disagrees with where it actually
/// lands, which means the region list was corrupted.
pub fn serialize(request: &Request) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(request.len());
    for (pos, region) in request.regions().iter().enumerate() {
        if region.offset() != buffer.len() {
            return Err(SpliceError::Serialization(format!(
                "region {} recorded at offset {} but starts at {}",
                pos,
                region.offset(),
                buffer.len()
            )));
        }
        buffer.extend_from_slice(region.content());
    }
    Ok(buffer)
}

/// Rewrite bare `LF` to `CRLF`, unless the buffer already uses `CRLF` anywhere.
pub fn normalize_newlines(buffer: &[u8]) -> Vec<u8> {
    if find(buffer, CRLF).is_some() {
        return buffer.to_vec();
    }

    let mut out = Vec::with_capacity(buffer.len() + buffer.len() / 16);
    for &b in buffer {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

/// Value span of the first `name:` header line in a header section
fn header_value_range(head: &[u8], name: &str) -> Option<Range<usize>> {
    let mut needle = Vec::with_capacity(name.len() + 3);
    needle.extend_from_slice(CRLF);
    needle.extend_from_slice(name.as_bytes());
    needle.push(b':');

    let start = find(head, &needle)? + needle.len();
    let end = find(&head[start..], CRLF).map_or(head.len(), |i| start + i);
    Some(start..end)
}

/// Set a header, replacing the value of the first existing occurrence or
/// inserting it as the last header. A buffer without a header/body boundary
/// is returned as is.
pub fn set_header(buffer: &[u8], name: &str, value: &str) -> Vec<u8> {
    let boundary = match find(buffer, HEADER_END) {
        Some(i) => i,
        None => {
            debug!(header = name, "no header/body boundary, header not set");
            return buffer.to_vec();
        }
    };

    let mut out = Vec::with_capacity(buffer.len() + name.len() + value.len() + 4);
    match header_value_range(&buffer[..boundary], name) {
        Some(range) => {
            out.extend_from_slice(&buffer[..range.start]);
            out.push(b' ');
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(&buffer[range.end..]);
        }
        None => {
            out.extend_from_slice(&buffer[..boundary]);
            out.extend_from_slice(CRLF);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(&buffer[boundary..]);
        }
    }
    out
}

/// Rewrite an existing `Content-Length` to the actual body length.
///
/// Requests without the header, or without a header/body boundary, are
/// returned unchanged. The header is never added.
pub fn correct_content_length(buffer: &[u8]) -> Vec<u8> {
    let boundary = match find(buffer, HEADER_END) {
        Some(i) => i,
        None => return buffer.to_vec(),
    };
    if header_value_range(&buffer[..boundary], "Content-Length").is_none() {
        return buffer.to_vec();
    }

    let body_len = buffer.len() - (boundary + HEADER_END.len());
    debug!(body_len, "correcting Content-Length");
    set_header(buffer, "Content-Length", &body_len.to_string())
}

/// A request ready to send: final bytes plus the metadata the core needs
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    pub bytes: Vec<u8>,
    pub host: String,
    pub use_tls: bool,
    pub properties: Properties,
}

impl GeneratedRequest {
    /// Serialize, normalize newlines, then repair `Content-Length`
    pub fn build(request: &Request) -> Result<Self> {
        let raw = serialize(request)?;
        let bytes = correct_content_length(&normalize_newlines(&raw));

        Ok(Self {
            bytes,
            host: request.host().to_string(),
            use_tls: request.use_tls(),
            properties: request.properties().clone(),
        })
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}
