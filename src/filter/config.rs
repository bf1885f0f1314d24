use crate::algorithms::DEFAULT_ALGORITHM_CONFIGURATION;
use crate::error::{SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const PARAM_ALGORITHM_CONFIGURATION: &str = "algorithmConfiguration";
pub const PARAM_AUTHENTICATION_CONFIGURATION: &str = "authenticationConfiguration";
pub const PARAM_SECURITY_CACHE_SIZE: &str = "securityCacheSize";

pub const DEFAULT_SECURITY_CACHE_SIZE: usize = 1000;

/// Filter init parameters, as handed over by the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    params: HashMap<String, String>,
}

#[derive(Deserialize)]
struct TomlFilterConfig {
    #[serde(default)]
    init_params: HashMap<String, String>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Parse a TOML document with an `[init_params]` string table.
    pub fn from_toml_str(source: &str) -> SecurityResult<Self> {
        let parsed: TomlFilterConfig = toml::from_str(source)
            .map_err(|e| SecurityError::precondition(format!("invalid filter config: {}", e)))?;
        Ok(Self {
            params: parsed.init_params,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// `algorithmConfiguration`, or the built-in RS256 configuration.
    pub fn algorithm_configuration(&self) -> &str {
        self.get(PARAM_ALGORITHM_CONFIGURATION)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_ALGORITHM_CONFIGURATION)
    }

    /// `authenticationConfiguration`, with defaults for absent fields.
    pub fn authentication_configuration(&self) -> SecurityResult<AuthenticationConfiguration> {
        match self
            .get(PARAM_AUTHENTICATION_CONFIGURATION)
            .filter(|s| !s.trim().is_empty())
        {
            Some(json) => serde_json::from_str(json).map_err(|e| {
                SecurityError::precondition(format!("invalid {}: {}", PARAM_AUTHENTICATION_CONFIGURATION, e))
            }),
            None => Ok(AuthenticationConfiguration::default()),
        }
    }

    /// `securityCacheSize`, default 1000.
    pub fn security_cache_size(&self) -> SecurityResult<usize> {
        match self.get(PARAM_SECURITY_CACHE_SIZE).map(str::trim) {
            None | Some("") => Ok(DEFAULT_SECURITY_CACHE_SIZE),
            Some(raw) => raw.parse().map_err(|_| {
                SecurityError::precondition(format!(
                    "{} must be a non-negative integer, got '{}'",
                    PARAM_SECURITY_CACHE_SIZE, raw
                ))
            }),
        }
    }
}

/// Behavioural settings for the authentication filter and logout flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticationConfiguration {
    /// Identity provider base URL the tenant path is appended to
    pub authority: String,
    pub token_cookie_name: String,
    /// Holds the login nonce until the provider posts the token back
    pub nonce_cookie_name: String,
    /// Container session cookies cleared on logout
    pub session_cookie_names: Vec<String>,
    /// Where the user ends up after logout
    pub landing_url: String,
    pub logout_path: String,
    /// Path prefixes that bypass authentication
    pub excluded_paths: Vec<String>,
    pub leeway_seconds: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub allow_insecure_localhost: bool,
}

impl Default for AuthenticationConfiguration {
    fn default() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            token_cookie_name: "id_token".to_string(),
            nonce_cookie_name: "aadgate_nonce".to_string(),
            session_cookie_names: vec!["JSESSIONID".to_string(), "SESSION".to_string()],
            landing_url: "/".to_string(),
            logout_path: "/logout".to_string(),
            excluded_paths: Vec::new(),
            leeway_seconds: 0,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            sweep_interval_seconds: 60,
            allow_insecure_localhost: true,
        }
    }
}

impl AuthenticationConfiguration {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Whether `path` skips authentication entirely.
    pub fn is_excluded(&self, path: &str) -> bool {
        if path == self.logout_path {
            return true;
        }
        self.excluded_paths.iter().any(|prefix| {
            !prefix.is_empty()
                && path.starts_with(prefix.as_str())
                && (prefix.ends_with('/')
                    || path.len() == prefix.len()
                    || path.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_params_absent() {
        let config = FilterConfig::new();
        assert_eq!(config.security_cache_size().unwrap(), 1000);
        assert_eq!(config.algorithm_configuration(), DEFAULT_ALGORITHM_CONFIGURATION);
        let auth = config.authentication_configuration().unwrap();
        assert_eq!(auth.token_cookie_name, "id_token");
        assert_eq!(auth.nonce_cookie_name, "aadgate_nonce");
        assert_eq!(auth.session_cookie_names, vec!["JSESSIONID", "SESSION"]);
        assert_eq!(auth.connect_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_authentication_configuration() {
        let config = FilterConfig::new().with_param(
            PARAM_AUTHENTICATION_CONFIGURATION,
            r#"{"landingUrl": "https://app.example.com/", "excludedPaths": ["/health"]}"#,
        );
        let auth = config.authentication_configuration().unwrap();
        assert_eq!(auth.landing_url, "https://app.example.com/");
        assert_eq!(auth.logout_path, "/logout");
        assert!(auth.is_excluded("/health"));
        assert!(auth.is_excluded("/health/live"));
        assert!(!auth.is_excluded("/healthz"));
        assert!(auth.is_excluded("/logout"));
        assert!(!auth.is_excluded("/reports"));
    }

    #[test]
    fn test_invalid_cache_size_is_fatal() {
        let config = FilterConfig::new().with_param(PARAM_SECURITY_CACHE_SIZE, "lots");
        assert!(config.security_cache_size().unwrap_err().is_fatal());
    }

    #[test]
    fn test_from_toml() {
        let config = FilterConfig::from_toml_str(
            r#"
[init_params]
securityCacheSize = "10"
authenticationConfiguration = '{"authority": "https://contoso.b2clogin.com"}'
"#,
        )
        .unwrap();
        assert_eq!(config.security_cache_size().unwrap(), 10);
        assert_eq!(
            config.authentication_configuration().unwrap().authority,
            "https://contoso.b2clogin.com"
        );
    }
}
