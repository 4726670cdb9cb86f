// Authentication for calls to the core
// The core identifies scripts by a fixed API key header

use reqwest::blocking::RequestBuilder;
use std::fmt;

pub const API_KEY_HEADER: &str = "X-API-Key";

pub trait AuthStrategy: Send + Sync {
    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder;
}

pub struct ApiKeyAuth {
    key: String,
}

impl ApiKeyAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl AuthStrategy for ApiKeyAuth {
    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(API_KEY_HEADER, &self.key)
    }
}

// Never print the key itself
impl fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyAuth").field("key", &"<redacted>").finish()
    }
}
