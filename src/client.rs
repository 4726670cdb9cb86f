// Submission client for the core
//
// Every call is one blocking round trip. The client holds no per-request
// state, so a single instance can be shared between threads submitting
// independent variants.

use base64::{engine::general_purpose, Engine as _};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, info};

use crate::auth::{ApiKeyAuth, AuthStrategy};
use crate::builder::GeneratedRequest;
use crate::config::CoreConfig;
use crate::error::{Result, SpliceError};
use crate::models::Request;

pub const QUEUE_PATH: &str = "/requests/queue";
pub const MAKE_PATH: &str = "/requests/make";
pub const CONTENTS_PATH: &str = "/requests/contents";
pub const PROGRESS_PATH: &str = "/scripts/update_progress";

/// Raw status and body of a core reply
#[derive(Debug, Clone)]
pub struct CoreReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl CoreReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// How requests reach the core
pub trait CoreTransport: Send + Sync {
    fn post_json(&self, path: &str, body: &Value) -> Result<CoreReply>;
    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<CoreReply>;
}

/// HTTP transport to a core listening on a local port
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Box<dyn AuthStrategy>,
}

impl HttpTransport {
    pub fn new(config: &CoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            auth: Box::new(ApiKeyAuth::new(config.api_key.clone())),
        })
    }

    fn read(resp: Response) -> Result<CoreReply> {
        let status = resp.status().as_u16();
        let body = resp.bytes()?.to_vec();
        Ok(CoreReply { status, body })
    }
}

impl CoreTransport for HttpTransport {
    fn post_json(&self, path: &str, body: &Value) -> Result<CoreReply> {
        let req = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        Self::read(self.auth.apply_auth(req).send()?)
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<CoreReply> {
        let req = self.client.get(format!("{}{}", self.base_url, path)).query(query);
        Self::read(self.auth.apply_auth(req).send()?)
    }
}

/// The core's identifier for a submitted request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request the core executed and the response it got back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub request: Vec<u8>,
    pub response_headers: Vec<u8>,
    pub response_body: Vec<u8>,
}

impl Outcome {
    /// Split the response at the first header/body boundary. A response with
    /// no boundary is all headers and an empty body.
    pub fn new(request: Vec<u8>, response: Vec<u8>) -> Self {
        let split = find(&response, b"\r\n\r\n")
            .map(|i| (i, i + 4))
            .or_else(|| find(&response, b"\n\n").map(|i| (i, i + 2)));

        let (response_headers, response_body) = match split {
            Some((end, start)) => (response[..end].to_vec(), response[start..].to_vec()),
            None => (response, Vec::new()),
        };

        Self {
            request,
            response_headers,
            response_body,
        }
    }

    /// First line of the response, e.g. `HTTP/1.1 200 OK`
    pub fn status_line(&self) -> &[u8] {
        let end = self
            .response_headers
            .iter()
            .position(|b| *b == b'\r' || *b == b'\n')
            .unwrap_or(self.response_headers.len());
        &self.response_headers[..end]
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    request: String,
    host: &'a str,
    ssl: bool,
    scan_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payloads: Option<String>,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct QueueReply {
    #[serde(rename = "GUID")]
    guid: String,
}

#[derive(Deserialize)]
struct ContentsReply {
    #[serde(rename = "Request")]
    request: String,
    #[serde(rename = "Response")]
    response: String,
}

#[derive(Serialize)]
struct ProgressUpdate<'a> {
    #[serde(rename = "Count")]
    count: usize,
    #[serde(rename = "Total")]
    total: usize,
    #[serde(rename = "ScanID")]
    scan_id: &'a str,
}

pub struct CoreClient {
    transport: Box<dyn CoreTransport>,
    scan_id: String,
}

impl CoreClient {
    pub fn new(transport: Box<dyn CoreTransport>, scan_id: impl Into<String>) -> Self {
        Self {
            transport,
            scan_id: scan_id.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Box::new(transport), config.scan_id.clone()))
    }

    /// Body of an enqueue call for a built request
    pub fn submission_body(&self, generated: &GeneratedRequest) -> Result<Value> {
        let body = SubmitBody {
            request: generated.to_base64(),
            host: &generated.host,
            ssl: generated.use_tls,
            scan_id: &self.scan_id,
            payloads: generated.properties.substitution_record_json(),
            extra: generated.properties.extra(),
        };
        serde_json::to_value(body).map_err(|e| SpliceError::Serialization(e.to_string()))
    }

    fn check(reply: CoreReply) -> Result<Vec<u8>> {
        if reply.is_success() {
            return Ok(reply.body);
        }
        Err(SpliceError::CoreRequestFailed {
            status: reply.status,
            body: String::from_utf8_lossy(&reply.body).into_owned(),
        })
    }

    fn submit(&self, path: &str, request: &Request) -> Result<SubmissionHandle> {
        let generated = GeneratedRequest::build(request)?;
        let body = self.submission_body(&generated)?;
        let reply = Self::check(self.transport.post_json(path, &body)?)?;

        let parsed: QueueReply = serde_json::from_slice(&reply)
            .map_err(|e| SpliceError::MalformedCoreResponse(format!("enqueue reply: {}", e)))?;
        if parsed.guid.is_empty() {
            return Err(SpliceError::MalformedCoreResponse("enqueue reply has an empty GUID".to_string()));
        }

        info!(
            host = %generated.host,
            bytes = generated.bytes.len(),
            substitutions = generated.properties.substitutions().len(),
            guid = %parsed.guid,
            "submitted request to {}",
            path
        );
        Ok(SubmissionHandle(parsed.guid))
    }

    /// Queue a request for execution without waiting for it
    pub fn queue(&self, request: &Request) -> Result<SubmissionHandle> {
        self.submit(QUEUE_PATH, request)
    }

    /// Queue the unmodified base request, tagged so the core can tell it apart
    /// from the variants
    pub fn queue_base(&self, request: &Request) -> Result<SubmissionHandle> {
        let base = request.clone().with_property("base_request", json!(true))?;
        self.queue(&base)
    }

    /// Have the core execute a request now and return the result
    pub fn queue_and_wait(&self, request: &Request) -> Result<Outcome> {
        let handle = self.submit(MAKE_PATH, request)?;
        self.get_outcome(&handle)
    }

    /// Fetch the stored request/response pair for a submitted request
    pub fn get_outcome(&self, handle: &SubmissionHandle) -> Result<Outcome> {
        let query = [("guid", handle.id()), ("scan_id", self.scan_id.as_str())];
        let reply = Self::check(self.transport.get(CONTENTS_PATH, &query)?)?;

        let parsed: ContentsReply = serde_json::from_slice(&reply)
            .map_err(|e| SpliceError::MalformedCoreResponse(format!("contents reply: {}", e)))?;
        let request = decode_field("Request", &parsed.request)?;
        let response = decode_field("Response", &parsed.response)?;

        debug!(guid = %handle, response_bytes = response.len(), "fetched outcome");
        Ok(Outcome::new(request, response))
    }

    /// Tell the core how far through its payload list a script is
    pub fn report_progress(&self, count: usize, total: usize) -> Result<()> {
        let update = ProgressUpdate {
            count,
            total,
            scan_id: &self.scan_id,
        };
        let body = serde_json::to_value(update).map_err(|e| SpliceError::Serialization(e.to_string()))?;
        Self::check(self.transport.post_json(PROGRESS_PATH, &body)?)?;
        Ok(())
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| SpliceError::MalformedCoreResponse(format!("{} is not base64: {}", name, e)))
}
