//! Client configuration and URL assembly.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

pub const SERVICES_PATH: &str = "services";
pub const JOBS_PATH: &str = "jobs";
pub const JOB_STATUS_PATH: &str = "status";
pub const JOB_SEARCH_PATH: &str = "search";
pub const SUBMIT_JOB_PATH: &str = "submitJob";
pub const EVENTS_PATH: &str = "events";

/// How session headers reach the event stream endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventHeaderMode {
    /// Send headers as real HTTP request headers.
    Headers,
    /// Encode headers as URL query parameters on the events URL.
    #[default]
    QueryString,
}

impl fmt::Display for EventHeaderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHeaderMode::Headers => write!(f, "headers"),
            EventHeaderMode::QueryString => write!(f, "query_string"),
        }
    }
}

/// Connection settings for one Grid server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Server address or host name.
    pub address: String,
    /// Server port. Omitted from URLs when unset.
    #[serde(default)]
    pub port: Option<u16>,
    /// URL scheme (default: "http").
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// API root path appended to the server URL (default: empty).
    #[serde(default, rename = "APIRoot", alias = "apiRoot")]
    pub api_root: String,
    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds (default: 30, 0 disables it).
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub event_header_mode: EventHeaderMode,
}

fn default_protocol() -> String { "http".to_string() }
fn default_timeout() -> u64 { 30 }

impl ClientConfig {
    /// Create a configuration for `address` with every other field defaulted.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
            protocol: default_protocol(),
            api_root: String::new(),
            headers: BTreeMap::new(),
            request_timeout_secs: default_timeout(),
            event_header_mode: EventHeaderMode::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_event_header_mode(mut self, mode: EventHeaderMode) -> Self {
        self.event_header_mode = mode;
        self
    }

    /// Load configuration from `GRID_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// `GRID_HEADERS` takes comma separated `name=value` pairs.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let address = std::env::var("GRID_ADDRESS")
            .map_err(|_| GridError::Config("GRID_ADDRESS is not set".to_string()))?;
        let mut config = Self::new(address);

        if let Ok(port) = std::env::var("GRID_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| GridError::Config(format!("invalid GRID_PORT '{}': {}", port, e)))?;
            config.port = Some(port);
        }
        if let Ok(protocol) = std::env::var("GRID_PROTOCOL") {
            config.protocol = protocol;
        }
        if let Ok(api_root) = std::env::var("GRID_API_ROOT") {
            config.api_root = api_root;
        }
        if let Ok(headers) = std::env::var("GRID_HEADERS") {
            config.headers.extend(parse_header_list(&headers)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that can never produce a valid request.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(GridError::Config("address cannot be empty".to_string()));
        }
        if self.protocol.trim().is_empty() {
            return Err(GridError::Config("protocol cannot be empty".to_string()));
        }
        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GridError::Config(format!("invalid header name '{}': {}", name, e)))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| GridError::Config(format!("invalid header value for '{}': {}", name, e)))?;
        }
        Ok(())
    }

    /// `protocol://address[:port]`
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.address, port),
            None => format!("{}://{}", self.protocol, self.address),
        }
    }

    /// Base URL joined with the API root, if any.
    pub fn root_url(&self) -> String {
        let root = self.api_root.trim_matches('/');
        if root.is_empty() {
            self.base_url()
        } else {
            format!("{}/{}", self.base_url(), root)
        }
    }

    /// Event stream URL, with headers appended as query parameters in
    /// [`EventHeaderMode::QueryString`] mode.
    pub fn events_url(&self) -> String {
        let url = format!("{}/{}", self.root_url(), EVENTS_PATH);
        if self.event_header_mode != EventHeaderMode::QueryString || self.headers.is_empty() {
            return url;
        }
        let query = self
            .headers
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", url, query)
    }

    /// Request timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

fn parse_header_list(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| GridError::Config(format!("invalid header entry '{}'", pair)))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}
