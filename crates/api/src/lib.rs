//! HTTP client utilities for DAS backend services.
//!
//! This module provides a lightweight client used by the transport layer to
//! talk to backend data services. It focuses on:
//!
//! - Constructing an HTTP client with a per-call timeout and sensible defaults
//! - Validating service URLs before they are dispatched
//! - Building GET or JSON-body POST requests with a consistent User-Agent
//!
//! The primary entry point is [`DasClient`]. Create an instance via
//! [`DasClient::new`], and then build requests with [`DasClient::request`].
//!
//! # Example
//!
//! ```ignore
//! use das_api::DasClient;
//! use std::time::Duration;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let client = DasClient::new(Duration::from_secs(30), None)?;
//!     let res = client.request("https://cmsweb.cern.ch/dbs/prod/global/DBSReader/datasets", None)?.send().await?;
//!     println!("status: {}", res.status());
//!     Ok(())
//! }
//! ```

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, Url, header};
use serde_json::Value;
use tracing::debug;

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Environment variable holding an optional bearer token sent to every service.
pub const TOKEN_ENV: &str = "DAS_BEARER_TOKEN";

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for backend service access.
///
/// The client pre-configures default headers and the per-call timeout. Every
/// request URL is validated before it is built.
pub struct DasClient {
    pub http: Client,
    pub user_agent: String,
}

impl DasClient {
    /// Construct a [`DasClient`] with the given per-call timeout.
    ///
    /// When `DAS_BEARER_TOKEN` is set its value is sent as an
    /// `Authorization: Bearer` header.
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        if let Ok(token) = env::var(TOKEN_ENV)
            && !token.trim().is_empty()
        {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token.trim())).context("invalid bearer token")?;
            default_headers.insert(header::AUTHORIZATION, value);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            user_agent: user_agent
                .map(str::to_string)
                .unwrap_or_else(|| format!("das-client/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS)),
        })
    }

    /// Build a request for a fully resolved service URL.
    ///
    /// Calls without `args` are issued as GET; calls with `args` POST the
    /// value as a JSON body.
    pub fn request(&self, url: &str, args: Option<&Value>) -> Result<RequestBuilder> {
        let parsed = validate_service_url(url)?;
        debug!(url = %parsed, has_body = args.is_some(), "building request");
        let builder = match args {
            Some(body) => self.http.post(parsed).json(body),
            None => self.http.get(parsed),
        };
        Ok(builder.header(header::USER_AGENT, &self.user_agent))
    }
}

/// Validate that a service URL is acceptable for dispatch.
///
/// Rules:
/// - the URL must parse and include a host
/// - `localhost` or `127.0.0.1`: `http` or `https`
/// - otherwise: `https`, or `http` when the URL carries an explicit port
///   (in-cluster service endpoints)
pub fn validate_service_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| anyhow!("Invalid service URL '{}': {}", url, e))?;
    let host_name = parsed
        .host_str()
        .ok_or_else(|| anyhow!("service URL '{}' must include a host", url))?;

    let scheme = parsed.scheme();
    if scheme != "https" && scheme != "http" {
        return Err(anyhow!("service URL '{}' uses unsupported scheme '{}://'", url, scheme));
    }

    let is_local = LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed));
    if scheme == "http" && !is_local && parsed.port().is_none() {
        return Err(anyhow!(
            "service URL '{}' must use https for non-localhost hosts without an explicit port",
            url
        ));
    }

    Ok(parsed)
}
