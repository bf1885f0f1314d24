//! OpenID Connect discovery document loader and parser.

use super::HttpFetcher;
use crate::error::{SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::thread::JoinHandle;
use tracing::{error, info};
use url::Url;

/// Immutable snapshot of the identity provider's discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    /// Expected `iss` claim of tokens
    pub issuer: String,
    /// Signing algorithms the provider advertises, in document order
    pub supported_algorithms: Vec<String>,
    /// `jwks_uri`
    pub key_store_endpoint: String,
    /// `authorization_endpoint`
    pub authentication_endpoint: String,
    /// `end_session_endpoint`, when the provider publishes one
    pub logout_endpoint: Option<String>,
}

impl Configuration {
    /// Whether the provider advertises `alg`.
    pub fn supports_algorithm(&self, alg: &str) -> bool {
        self.supported_algorithms.iter().any(|a| a == alg)
    }
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    id_token_signing_alg_values_supported: Vec<String>,
    jwks_uri: String,
    authorization_endpoint: String,
    #[serde(default)]
    end_session_endpoint: Option<String>,
}

/// Convert a parsed discovery document into a [`Configuration`].
///
/// A JSON `null` is a precondition failure; a document missing any of
/// `issuer`, `id_token_signing_alg_values_supported`, `jwks_uri` or
/// `authorization_endpoint` is malformed.
pub fn parse_configuration(document: &Value) -> SecurityResult<Configuration> {
    if document.is_null() {
        return Err(SecurityError::precondition("discovery document is null"));
    }
    let doc = DiscoveryDocument::deserialize(document)
        .map_err(|e| SecurityError::malformed("discovery document", e))?;
    if doc.id_token_signing_alg_values_supported.is_empty() {
        return Err(SecurityError::malformed(
            "discovery document",
            "id_token_signing_alg_values_supported is empty",
        ));
    }
    Ok(Configuration {
        issuer: doc.issuer,
        supported_algorithms: doc.id_token_signing_alg_values_supported,
        key_store_endpoint: doc.jwks_uri,
        authentication_endpoint: doc.authorization_endpoint,
        logout_endpoint: doc.end_session_endpoint.filter(|s| !s.is_empty()),
    })
}

/// Build `<authority>/<tenant>/v2.0/.well-known/openid-configuration?p=<policy>`.
///
/// The `p` parameter is omitted when no policy is configured (plain Azure AD
/// rather than B2C).
pub fn well_known_url(authority: &str, tenant: &str, policy: &str) -> SecurityResult<String> {
    if tenant.is_empty() {
        return Err(SecurityError::precondition("tenant is empty"));
    }
    let base = format!(
        "{}/{}/v2.0/.well-known/openid-configuration",
        authority.trim_end_matches('/'),
        tenant
    );
    let mut url = Url::parse(&base)
        .map_err(|e| SecurityError::precondition(format!("invalid authority '{}': {}", authority, e)))?;
    if !policy.is_empty() {
        url.query_pairs_mut().append_pair("p", policy);
    }
    Ok(url.into())
}

/// Fetches the discovery document from a fixed URL.
#[derive(Debug, Clone)]
pub struct WellKnownLoader {
    fetcher: HttpFetcher,
    url: String,
}

impl WellKnownLoader {
    pub fn new(fetcher: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
        }
    }

    /// Discovery document URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the document on the calling thread.
    pub fn load(&self) -> SecurityResult<Configuration> {
        let result = self
            .fetcher
            .get_json(&self.url)
            .and_then(|doc| parse_configuration(&doc));
        match &result {
            Ok(config) => info!(
                url = %self.url,
                issuer = %config.issuer,
                jwks_uri = %config.key_store_endpoint,
                "discovery document loaded"
            ),
            Err(e) => error!(url = %self.url, kind = e.kind(), error = %e, "discovery failed"),
        }
        result
    }

    /// Run [`WellKnownLoader::load`] on a short-lived worker thread.
    ///
    /// Joining the handle yields the same result `load` would have returned.
    /// Fails with a transport error when the worker cannot be spawned.
    pub fn load_async(&self) -> SecurityResult<JoinHandle<SecurityResult<Configuration>>> {
        let loader = self.clone();
        std::thread::Builder::new()
            .name("aadgate-discovery".to_string())
            .spawn(move || loader.load())
            .map_err(|e| {
                error!(url = %self.url, error = %e, "cannot spawn discovery worker");
                SecurityError::transport(self.url.clone(), format!("cannot spawn discovery worker: {}", e))
            })
    }
}
