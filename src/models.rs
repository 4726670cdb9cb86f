// Core data models for splice
//
// A captured request is held as an ordered list of byte regions. Literal
// regions are fixed; injectable regions are the injection points that payloads
// are substituted into.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Result, SpliceError};

/// Keys the client writes into every submission itself.
/// Script metadata may not use them.
pub const RESERVED_PROPERTIES: &[&str] = &["request", "host", "ssl", "scan_id", "payloads"];

/// Half-open byte range `[offset, offset + length)` of an injectable region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionPoint {
    pub offset: usize,
    pub length: usize,
}

impl InjectionPoint {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// A contiguous span of the request.
///
/// Content is immutable and shared between variants; only the region list
/// itself is owned per request, so a substitution never reaches into another
/// variant's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub(crate) offset: usize,
    pub(crate) content: Arc<[u8]>,
    pub(crate) injectable: bool,
}

impl Region {
    pub fn literal(offset: usize, bytes: &[u8]) -> Self {
        Self {
            offset,
            content: Arc::from(bytes),
            injectable: false,
        }
    }

    pub fn injectable(offset: usize, bytes: &[u8]) -> Self {
        Self {
            offset,
            content: Arc::from(bytes),
            injectable: true,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn is_injectable(&self) -> bool {
        self.injectable
    }
}

/// One entry of the substitution record: which point got which payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub index: usize,
    pub payload: Vec<u8>,
}

/// Metadata forwarded to the core alongside a request.
///
/// The wire fields (`request`, `host`, `ssl`, `scan_id`) and the substitution
/// record are filled in by the client; everything a script adds goes into the
/// extension map and is rejected if it would shadow one of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    substitutions: Vec<Substitution>,
    extra: Map<String, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if RESERVED_PROPERTIES.contains(&key.as_str()) {
            return Err(SpliceError::ReservedProperty(key));
        }
        self.extra.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    pub(crate) fn record(&mut self, index: usize, payload: &[u8]) {
        self.substitutions.push(Substitution {
            index,
            payload: payload.to_vec(),
        });
    }

    /// The substitution record as the JSON-encoded string the core stores,
    /// e.g. `[[0,"1 OR 1=1"]]`. `None` for a request nothing was substituted into.
    pub fn substitution_record_json(&self) -> Option<String> {
        if self.substitutions.is_empty() {
            return None;
        }
        let pairs: Vec<(usize, String)> = self
            .substitutions
            .iter()
            .map(|s| (s.index, String::from_utf8_lossy(&s.payload).into_owned()))
            .collect();
        serde_json::to_string(&pairs).ok()
    }
}

/// A request part as the core hands it to scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPart {
    #[serde(rename = "Inject")]
    pub inject: bool,
    #[serde(rename = "RequestPart")]
    pub request_part: String,
}

impl RequestPart {
    pub fn new(inject: bool, bytes: &[u8]) -> Self {
        Self {
            inject,
            request_part: general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.request_part)
            .map_err(|e| SpliceError::InvalidRequestParts(format!("bad base64 in part: {}", e)))
    }
}

/// A captured HTTP request split into literal and injectable regions
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub(crate) host: String,
    pub(crate) use_tls: bool,
    pub(crate) regions: Vec<Region>,
    pub(crate) properties: Properties,
}

impl Request {
    /// Build a request from `(injectable, bytes)` segments laid end to end
    pub fn from_segments<I>(host: impl Into<String>, use_tls: bool, segments: I) -> Self
    where
        I: IntoIterator<Item = (bool, Vec<u8>)>,
    {
        let mut regions = Vec::new();
        let mut offset = 0;
        for (injectable, bytes) in segments {
            let region = if injectable {
                Region::injectable(offset, &bytes)
            } else {
                Region::literal(offset, &bytes)
            };
            offset += region.len();
            regions.push(region);
        }

        Self {
            host: host.into(),
            use_tls,
            regions,
            properties: Properties::new(),
        }
    }

    /// Build a request from raw bytes and the byte ranges to mark injectable.
    ///
    /// Ranges must be in bounds, sorted and non-overlapping. The bytes between
    /// them become literal regions.
    pub fn from_ranges(
        host: impl Into<String>,
        use_tls: bool,
        raw: &[u8],
        ranges: &[Range<usize>],
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(ranges.len() * 2 + 1);
        let mut cursor = 0;

        for range in ranges {
            if range.start > range.end || range.end > raw.len() || range.start < cursor {
                return Err(SpliceError::InvalidRange {
                    start: range.start,
                    end: range.end,
                    len: raw.len(),
                });
            }
            if range.start > cursor {
                segments.push((false, raw[cursor..range.start].to_vec()));
            }
            segments.push((true, raw[range.clone()].to_vec()));
            cursor = range.end;
        }
        if cursor < raw.len() {
            segments.push((false, raw[cursor..].to_vec()));
        }

        Ok(Self::from_segments(host, use_tls, segments))
    }

    /// Build a request from base64 request parts
    pub fn from_parts(host: impl Into<String>, use_tls: bool, parts: &[RequestPart]) -> Result<Self> {
        let segments = parts
            .iter()
            .map(|p| p.decode().map(|bytes| (p.inject, bytes)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_segments(host, use_tls, segments))
    }

    /// Build a request from a JSON array of `{"Inject": bool, "RequestPart": base64}`
    pub fn from_parts_json(host: impl Into<String>, use_tls: bool, json: &str) -> Result<Self> {
        let parts: Vec<RequestPart> = serde_json::from_str(json)
            .map_err(|e| SpliceError::InvalidRequestParts(format!("bad JSON: {}", e)))?;
        Self::from_parts(host, use_tls, &parts)
    }

    /// Return this request with an extra script property attached
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Result<Self> {
        self.properties.insert(key, value)?;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Total byte length of all regions
    pub fn len(&self) -> usize {
        self.regions.iter().map(Region::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The regions as base64 request parts, the inverse of `from_parts`
    pub fn to_parts(&self) -> Vec<RequestPart> {
        self.regions
            .iter()
            .map(|r| RequestPart::new(r.injectable, &r.content))
            .collect()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "https" } else { "http" };
        write!(
            f,
            "{}://{} ({} bytes, {} regions)",
            scheme,
            self.host,
            self.len(),
            self.regions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_ranges_splits_gaps_into_literals() {
        let raw = b"GET /?a=1&b=2 HTTP/1.1\r\n\r\n";
        let req = Request::from_ranges("x", false, raw, &[8..9, 12..13]).unwrap();

        let kinds: Vec<bool> = req.regions().iter().map(Region::is_injectable).collect();
        assert_eq!(kinds, vec![false, true, false, true, false]);
        assert_eq!(req.regions()[1].content(), b"1");
        assert_eq!(req.regions()[3].offset(), 12);
        assert_eq!(req.len(), raw.len());
    }

    #[test]
    fn from_ranges_rejects_overlap_and_out_of_bounds() {
        let raw = b"0123456789";
        assert!(matches!(
            Request::from_ranges("x", false, raw, &[2..5, 4..6]),
            Err(SpliceError::InvalidRange { start: 4, end: 6, .. })
        ));
        assert!(matches!(
            Request::from_ranges("x", false, raw, &[8..11]),
            Err(SpliceError::InvalidRange { .. })
        ));
    }

    #[test]
    fn parts_json_round_trip() {
        let parts = vec![
            RequestPart::new(false, b"GET /"),
            RequestPart::new(true, b"a"),
            RequestPart::new(false, b" HTTP/1.1\r\nHost: h\r\n\r\n"),
        ];
        let json = serde_json::to_string(&parts).unwrap();
        assert!(json.contains("\"Inject\":true"));

        let req = Request::from_parts_json("h", true, &json).unwrap();
        assert_eq!(req.regions()[1].offset(), 5);
        assert_eq!(req.to_parts(), parts);
    }

    #[test]
    fn parts_json_rejects_bad_base64() {
        let json = r#"[{"Inject": true, "RequestPart": "!!!"}]"#;
        assert!(matches!(
            Request::from_parts_json("h", false, json),
            Err(SpliceError::InvalidRequestParts(_))
        ));
    }

    #[test]
    fn reserved_properties_are_refused() {
        let req = Request::from_segments("h", false, vec![(false, b"x".to_vec())]);
        assert!(matches!(
            req.clone().with_property("host", json!("evil")),
            Err(SpliceError::ReservedProperty(k)) if k == "host"
        ));
        assert!(matches!(
            req.clone().with_property("payloads", json!("[]")),
            Err(SpliceError::ReservedProperty(k)) if k == "payloads"
        ));

        let req = req.with_property("base_request", json!(true)).unwrap();
        assert_eq!(req.properties().get("base_request"), Some(&json!(true)));
    }

    #[test]
    fn substitution_record_json_shape() {
        let mut props = Properties::new();
        assert_eq!(props.substitution_record_json(), None);
        props.record(0, b"1 OR 1=1");
        props.record(2, b"");
        assert_eq!(
            props.substitution_record_json().unwrap(),
            r#"[[0,"1 OR 1=1"],[2,""]]"#
        );
    }
}
