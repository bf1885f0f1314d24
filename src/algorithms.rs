//! Registry of signing algorithms the filter is willing to verify.
//!
//! Loaded once from the `algorithmConfiguration` init parameter:
//!
//! ```json
//! {
//!   "algorithms":       [{ "name": "RS256", "implementationName": "RS256" }],
//!   "algorithmClasses": [{ "name": "RSA",   "implementationName": "RSA" }]
//! }
//! ```
//!
//! `algorithms` maps the name a token advertises in its `alg` header to the
//! verifier implementation. `algorithmClasses` maps an algorithm family to the
//! key type that implements it; only families whose implementation is backed
//! by the key store (RSA) can ever verify.

use crate::error::{SecurityError, SecurityResult};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedImplementation {
    name: String,
    implementation_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlgorithmConfiguration {
    #[serde(default)]
    algorithms: Vec<NamedImplementation>,
    #[serde(default)]
    algorithm_classes: Vec<NamedImplementation>,
}

/// Loaded algorithm configuration. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmConfiguration {
    algorithms: HashMap<String, String>,
    algorithm_classes: HashMap<String, String>,
}

impl AlgorithmConfiguration {
    /// Advertised algorithm name to implementation name.
    pub fn algorithms(&self) -> &HashMap<String, String> {
        &self.algorithms
    }

    /// Algorithm family name to implementation name.
    pub fn algorithm_classes(&self) -> &HashMap<String, String> {
        &self.algorithm_classes
    }
}

/// Explicitly constructed holder for the [`AlgorithmConfiguration`].
///
/// Built once in filter `init` and shared read-only with the request path.
#[derive(Debug, Clone)]
pub struct AlgorithmRegistry {
    config: AlgorithmConfiguration,
    resolved: HashMap<String, Algorithm>,
}

/// Built-in configuration used when the init parameter is absent.
pub const DEFAULT_ALGORITHM_CONFIGURATION: &str = r#"{
  "algorithms": [{ "name": "RS256", "implementationName": "RS256" }],
  "algorithmClasses": [{ "name": "RSA", "implementationName": "RSA" }]
}"#;

/// Family of a JOSE algorithm, as used for `algorithmClasses` lookups.
pub fn algorithm_class(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => "RSA",
        Algorithm::ES256 | Algorithm::ES384 => "EC",
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => "HMAC",
        Algorithm::EdDSA => "OKP",
        #[allow(unreachable_patterns)]
        _ => "UNKNOWN",
    }
}

impl AlgorithmRegistry {
    /// Parse and validate the configuration document.
    ///
    /// Every `implementationName` under `algorithms` must name a JOSE
    /// algorithm this build can verify; anything else is a configuration bug
    /// and reported as [`SecurityError::Fatal`].
    pub fn initialise(config_json: &str) -> SecurityResult<Self> {
        if config_json.trim().is_empty() {
            return Err(SecurityError::precondition(
                "algorithm configuration document is empty",
            ));
        }
        let raw: RawAlgorithmConfiguration = serde_json::from_str(config_json)
            .map_err(|e| SecurityError::precondition(format!("invalid algorithm configuration: {}", e)))?;

        let mut algorithms = HashMap::new();
        let mut resolved = HashMap::new();
        for entry in raw.algorithms {
            let alg = Algorithm::from_str(&entry.implementation_name).map_err(|_| {
                SecurityError::precondition(format!(
                    "unknown algorithm implementation '{}' for '{}'",
                    entry.implementation_name, entry.name
                ))
            })?;
            resolved.insert(entry.name.clone(), alg);
            algorithms.insert(entry.name, entry.implementation_name);
        }

        let algorithm_classes: HashMap<String, String> = raw
            .algorithm_classes
            .into_iter()
            .map(|c| (c.name, c.implementation_name))
            .collect();

        info!(
            algorithms = ?algorithms.keys().collect::<Vec<_>>(),
            classes = ?algorithm_classes.keys().collect::<Vec<_>>(),
            "algorithm registry initialised"
        );

        Ok(Self {
            config: AlgorithmConfiguration {
                algorithms,
                algorithm_classes,
            },
            resolved,
        })
    }

    /// Registry built from [`DEFAULT_ALGORITHM_CONFIGURATION`].
    pub fn with_defaults() -> SecurityResult<Self> {
        Self::initialise(DEFAULT_ALGORITHM_CONFIGURATION)
    }

    /// The loaded configuration.
    pub fn get(&self) -> &AlgorithmConfiguration {
        &self.config
    }

    /// Resolve an advertised algorithm name to the verifier to use.
    ///
    /// Returns `None` unless the name is registered, its implementation's
    /// family is registered, and that family is implemented by RSA keys.
    pub fn resolve(&self, advertised: &str) -> Option<Algorithm> {
        let alg = *self.resolved.get(advertised)?;
        let class = algorithm_class(alg);
        match self.config.algorithm_classes.get(class) {
            Some(implementation) if implementation.eq_ignore_ascii_case("RSA") => Some(alg),
            Some(implementation) => {
                debug!(%advertised, %class, %implementation, "algorithm class has no key support");
                None
            }
            None => {
                debug!(%advertised, %class, "algorithm class not registered");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_rs256_only() {
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        assert_eq!(registry.resolve("RS256"), Some(Algorithm::RS256));
        assert_eq!(registry.resolve("RS512"), None);
        assert_eq!(registry.resolve("none"), None);
        assert_eq!(registry.get().algorithms().get("RS256").map(String::as_str), Some("RS256"));
    }

    #[test]
    fn test_unknown_implementation_is_fatal() {
        let err = AlgorithmRegistry::initialise(
            r#"{"algorithms":[{"name":"RS256","implementationName":"SHA256withRSA"}]}"#,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_class_must_be_registered() {
        let registry = AlgorithmRegistry::initialise(
            r#"{"algorithms":[{"name":"RS256","implementationName":"RS256"}],"algorithmClasses":[]}"#,
        )
        .unwrap();
        assert_eq!(registry.resolve("RS256"), None);
    }

    #[test]
    fn test_hmac_family_never_resolves() {
        let registry = AlgorithmRegistry::initialise(
            r#"{"algorithms":[{"name":"HS256","implementationName":"HS256"}],
                "algorithmClasses":[{"name":"HMAC","implementationName":"HMAC"}]}"#,
        )
        .unwrap();
        assert_eq!(registry.resolve("HS256"), None);
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(AlgorithmRegistry::initialise("  ").unwrap_err().is_fatal());
        assert!(AlgorithmRegistry::initialise("not json").unwrap_err().is_fatal());
    }
}
