// Injection point discovery
//
// Builds a Request from raw captured bytes by marking every URL-encoded
// parameter value as an injection point:
//
//   GET /search?q=shoes&page=2 HTTP/1.1
//                ^^^^^      ^
//
// Query string values are always candidates. Body values are only split when
// the request declares `application/x-www-form-urlencoded`; any other body is
// kept as one literal region. Keys, separators and the rest of the request are
// literal.

use lazy_static::lazy_static;
use regex::bytes::Regex;
use tracing::debug;

use crate::models::Request;

lazy_static! {
    static ref REQUEST_LINE: Regex = Regex::new(r"^(\S+) (\S+) (\S+)\r?$").unwrap();
    static ref FORM_CONTENT_TYPE: Regex =
        Regex::new(r"(?im)^content-type:[ \t]*application/x-www-form-urlencoded").unwrap();
}

/// Accumulates segments, merging neighbouring literal bytes into one region
#[derive(Default)]
struct SegmentBuilder {
    segments: Vec<(bool, Vec<u8>)>,
    literal: Vec<u8>,
}

impl SegmentBuilder {
    fn literal(&mut self, bytes: &[u8]) {
        self.literal.extend_from_slice(bytes);
    }

    fn inject(&mut self, bytes: &[u8]) {
        self.flush();
        self.segments.push((true, bytes.to_vec()));
    }

    fn flush(&mut self) {
        if !self.literal.is_empty() {
            self.segments.push((false, std::mem::take(&mut self.literal)));
        }
    }

    fn finish(mut self) -> Vec<(bool, Vec<u8>)> {
        self.flush();
        self.segments
    }

    /// `k1=v1&k2&k3=v3` → literal `k1=`, point `v1`, literal `&k2&k3=`, point `v3`
    fn urlencoded(&mut self, data: &[u8]) {
        for (i, pair) in data.split(|b| *b == b'&').enumerate() {
            if i > 0 {
                self.literal(b"&");
            }
            match pair.iter().position(|b| *b == b'=') {
                Some(eq) => {
                    self.literal(&pair[..=eq]);
                    self.inject(&pair[eq + 1..]);
                }
                None => self.literal(pair),
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Start of the body, if the request has a header/body boundary
fn body_start(raw: &[u8]) -> Option<usize> {
    find(raw, b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| find(raw, b"\n\n").map(|i| i + 2))
}

/// Split a raw request into literal and injectable regions.
///
/// A request whose first line is not `METHOD TARGET VERSION` comes back as a
/// single literal region with no injection points.
pub fn discover(host: impl Into<String>, use_tls: bool, raw: &[u8]) -> Request {
    let line_end = raw.iter().position(|b| *b == b'\n').unwrap_or(raw.len());

    let target = match REQUEST_LINE.captures(&raw[..line_end]).and_then(|c| c.get(2)) {
        Some(m) => m.range(),
        None => {
            debug!("request line not recognised, no injection points");
            return Request::from_segments(host, use_tls, vec![(false, raw.to_vec())]);
        }
    };

    let mut builder = SegmentBuilder::default();
    let mut cursor = 0;

    if let Some(q) = raw[target.clone()].iter().position(|b| *b == b'?') {
        let query_start = target.start + q + 1;
        builder.literal(&raw[..query_start]);
        builder.urlencoded(&raw[query_start..target.end]);
        cursor = target.end;
    }

    match body_start(raw) {
        Some(start) if start < raw.len() && FORM_CONTENT_TYPE.is_match(&raw[..start]) => {
            builder.literal(&raw[cursor..start]);
            builder.urlencoded(&raw[start..]);
        }
        _ => builder.literal(&raw[cursor..]),
    }

    let request = Request::from_segments(host, use_tls, builder.finish());
    debug!(points = request.count(), "discovered injection points");
    request
}
