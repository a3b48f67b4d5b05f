//! Upstream API client for forwarded sub-requests.
//!
//! This crate provides a lightweight client used by the HTTP dispatcher to
//! forward each resolved sub-request of a merge batch to an upstream service.
//! It focuses on:
//!
//! - Reading the upstream base URL, token, and timeout from the environment
//! - Validating the base URL for safety
//! - Building requests with a consistent User-Agent and Accept headers
//!
//! The primary entry point is [`MergeClient`]. Create an instance via
//! [`MergeClient::new`] or [`MergeClient::new_from_env`], then build requests
//! with [`MergeClient::request`].
//!
//! # Example
//!
//! ```ignore
//! use mergereq_api::MergeClient;
//!
//! let client = MergeClient::new_from_env()?;
//! let response = client.request(reqwest::Method::GET, "/users/42").send().await?;
//! println!("status: {}", response.status());
//! ```

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, Url, header};
use tracing::debug;

/// Environment variable naming the upstream base URL.
pub const BASE_URL_ENV: &str = "MERGEREQ_BASE_URL";
/// Environment variable holding an optional bearer token.
pub const API_TOKEN_ENV: &str = "MERGEREQ_API_TOKEN";
/// Environment variable overriding the request timeout, in seconds.
pub const TIMEOUT_ENV: &str = "MERGEREQ_TIMEOUT_SECS";

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Settings used to build a [`MergeClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Reads the configuration from `MERGEREQ_*` environment variables.
    ///
    /// Unset variables fall back to the defaults; a timeout that is not a
    /// whole number of seconds is an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(base_url) = env::var(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        config.token = env::var(API_TOKEN_ENV).ok().filter(|token| !token.trim().is_empty());
        if let Ok(raw_timeout) = env::var(TIMEOUT_ENV) {
            let seconds: u64 = raw_timeout
                .trim()
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV} must be a whole number of seconds, got '{raw_timeout}'"))?;
            config.timeout = Duration::from_secs(seconds);
        }
        Ok(config)
    }

    /// Replaces the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Thin wrapper around a configured `reqwest::Client` for the upstream service.
///
/// The client pre-configures default headers and builds requests against a
/// validated base URL.
#[derive(Debug, Clone)]
pub struct MergeClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl MergeClient {
    /// Construct a [`MergeClient`] from explicit settings.
    ///
    /// Non-localhost base URLs must use HTTPS.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Some(token) = &config.token {
            let authorization = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| anyhow!("{API_TOKEN_ENV} is not a valid header value: {error}"))?;
            default_headers.insert(header::AUTHORIZATION, authorization);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("mergereq/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Construct a [`MergeClient`] from `MERGEREQ_*` environment variables.
    pub fn new_from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Build a `reqwest::RequestBuilder` for a method and upstream-relative path.
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost`, `127.0.0.1`, or `[::1]`: `http` or `https`
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|error| anyhow!("Invalid {BASE_URL_ENV} URL '{base}': {error}"))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("{BASE_URL_ENV} must include a host"))?;

    let scheme = parsed_base_url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(anyhow!("{BASE_URL_ENV} must use http or https; got '{scheme}://'"));
    }

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if scheme != "https" {
        return Err(anyhow!("{BASE_URL_ENV} must use https for non-localhost hosts; got '{scheme}://'"));
    }

    Ok(())
}
