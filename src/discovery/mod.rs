//! # Discovery Module
//!
//! Fetches and parses the identity provider's published metadata:
//!
//! - [`well_known`]: the OpenID Connect discovery document
//!   (`/.well-known/openid-configuration`), giving the issuer, supported
//!   signing algorithms and the key-set, authorization and logout endpoints.
//! - [`jwks`]: the JSON Web Key Set at the discovery document's `jwks_uri`,
//!   giving the RSA public keys tokens are signed with.
//!
//! Loading (network I/O) and parsing (pure transformation of a JSON tree) are
//! separate functions so parsing is testable without a network and so a
//! failed fetch and a malformed document surface as different
//! [`SecurityError`] variants.
//!
//! ## Transport policy
//!
//! Every fetch goes through [`HttpFetcher`], which applies explicit connect
//! and read timeouts. A timeout is reported exactly like any other transport
//! failure. Endpoints must use HTTPS; plain HTTP is accepted only for the
//! exact hosts `localhost` and `127.0.0.1` when explicitly allowed (local
//! development and tests).

pub mod jwks;
pub mod well_known;

pub use jwks::{parse_keys, Key, KeyStore, KeyStoreLoader};
pub use well_known::{parse_configuration, well_known_url, Configuration, WellKnownLoader};

use crate::error::{SecurityError, SecurityResult};
use http::header::ACCEPT;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Blocking HTTP client for identity provider documents.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    allow_insecure_localhost: bool,
}

impl HttpFetcher {
    /// Build a fetcher with explicit timeouts.
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        allow_insecure_localhost: bool,
    ) -> SecurityResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| SecurityError::precondition(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            allow_insecure_localhost,
        })
    }

    /// Validate an endpoint URL against the transport policy.
    pub fn check_url(&self, raw: &str) -> SecurityResult<Url> {
        if raw.trim().is_empty() {
            return Err(SecurityError::precondition("endpoint URL is empty"));
        }
        let url = Url::parse(raw)
            .map_err(|e| SecurityError::precondition(format!("invalid endpoint URL '{}': {}", raw, e)))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_insecure_localhost => {
                // Exact match only; "localhost.attacker.com" must not pass.
                match url.host_str() {
                    Some("localhost") | Some("127.0.0.1") => Ok(url),
                    _ => Err(SecurityError::precondition(format!(
                        "endpoint must use HTTPS (HTTP only allowed for localhost/127.0.0.1): {}",
                        raw
                    ))),
                }
            }
            _ => Err(SecurityError::precondition(format!(
                "endpoint must use HTTPS: {}",
                raw
            ))),
        }
    }

    /// GET `url` and parse the body as JSON.
    pub fn get_json(&self, url: &str) -> SecurityResult<Value> {
        let checked = self.check_url(url)?;
        let started = Instant::now();
        let response = self
            .client
            .get(checked.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| {
                let detail = if e.is_timeout() {
                    format!("timed out: {}", e)
                } else {
                    e.to_string()
                };
                warn!(%url, error = %detail, "identity provider request failed");
                SecurityError::transport(url, detail)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "identity provider returned error status");
            return Err(SecurityError::transport(url, format!("HTTP status {}", status)));
        }

        let body = response
            .text()
            .map_err(|e| SecurityError::transport(url, format!("failed to read body: {}", e)))?;
        debug!(
            %url,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "identity provider document fetched"
        );
        serde_json::from_str(&body).map_err(|e| SecurityError::malformed(url, e))
    }
}
