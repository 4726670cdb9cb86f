// Core connection settings
// Supplied by the environment that launches a script, or by CLI flags

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SpliceError};

pub const DEFAULT_CORE_HOST: &str = "localhost";
pub const DEFAULT_CORE_PORT: u16 = 10101;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub scan_id: String,
    /// Per-call timeout, in seconds
    pub timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CORE_HOST.to_string(),
            port: DEFAULT_CORE_PORT,
            api_key: String::new(),
            scan_id: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl CoreConfig {
    /// Read `SPLICE_CORE_HOST`, `SPLICE_CORE_PORT`, `SPLICE_API_KEY`,
    /// `SPLICE_SCAN_ID` and `SPLICE_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("SPLICE_CORE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("SPLICE_CORE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| SpliceError::Config(format!("SPLICE_CORE_PORT is not a port: {}", port)))?;
        }
        if let Some(secs) = lookup("SPLICE_TIMEOUT_SECS") {
            config.timeout_secs = secs
                .parse()
                .map_err(|_| SpliceError::Config(format!("SPLICE_TIMEOUT_SECS is not a number: {}", secs)))?;
        }
        config.api_key = lookup("SPLICE_API_KEY")
            .ok_or_else(|| SpliceError::Config("SPLICE_API_KEY is not set".to_string()))?;
        config.scan_id = lookup("SPLICE_SCAN_ID")
            .ok_or_else(|| SpliceError::Config("SPLICE_SCAN_ID is not set".to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(SpliceError::Config("API key must not be empty".to_string()));
        }
        if self.scan_id.is_empty() {
            return Err(SpliceError::Config("scan id must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(SpliceError::Config("timeout must be at least one second".to_string()));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &"<redacted>")
            .field("scan_id", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
