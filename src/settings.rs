//! # Application Settings
//!
//! Deployment settings for the protected application, read once from the
//! process environment when the filter starts.
//!
//! ## Environment Variables
//!
//! | Variable                     | Required | Meaning                                  |
//! |------------------------------|----------|------------------------------------------|
//! | `AADGATE_TENANT`             | yes      | Directory (tenant) name or id            |
//! | `AADGATE_APPLICATION_ID`     | yes      | Client id registered with the IdP        |
//! | `AADGATE_APPLICATION_SECRET` | no       | Client secret                            |
//! | `AADGATE_PRINCIPAL_ID`       | no       | Service principal id                     |
//! | `AADGATE_PRINCIPAL_SECRET`   | no       | Service principal secret                 |
//! | `AADGATE_REDIRECT_URL`       | no       | Where the IdP posts the ID token back to |
//! | `AADGATE_POLICY`             | no       | B2C user-flow policy name (`p=`)         |

use crate::error::{SecurityError, SecurityResult};
use once_cell::sync::OnceCell;
use std::env;
use std::fmt;

pub const ENV_TENANT: &str = "AADGATE_TENANT";
pub const ENV_APPLICATION_ID: &str = "AADGATE_APPLICATION_ID";
pub const ENV_APPLICATION_SECRET: &str = "AADGATE_APPLICATION_SECRET";
pub const ENV_PRINCIPAL_ID: &str = "AADGATE_PRINCIPAL_ID";
pub const ENV_PRINCIPAL_SECRET: &str = "AADGATE_PRINCIPAL_SECRET";
pub const ENV_REDIRECT_URL: &str = "AADGATE_REDIRECT_URL";
pub const ENV_POLICY: &str = "AADGATE_POLICY";

#[derive(Debug, Clone, PartialEq, Eq)]
struct DerivedIdentifiers {
    application_id: String,
    principal_id: Option<String>,
}

/// Process-wide, read-only settings for the protected application.
pub struct ApplicationSettings {
    tenant: String,
    application_id: String,
    application_secret: String,
    principal_id: String,
    principal_secret: String,
    redirect_url: String,
    policy: String,
    // Single lock domain for all lazily derived values.
    derived: OnceCell<DerivedIdentifiers>,
}

impl ApplicationSettings {
    /// Load from the process environment.
    pub fn from_env() -> SecurityResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> SecurityResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).unwrap_or_default();
        let required = |name: &str| {
            let v = read(name);
            if v.is_empty() {
                Err(SecurityError::precondition(format!("{} must be set", name)))
            } else {
                Ok(v)
            }
        };

        Ok(Self {
            tenant: required(ENV_TENANT)?,
            application_id: required(ENV_APPLICATION_ID)?,
            application_secret: read(ENV_APPLICATION_SECRET),
            principal_id: read(ENV_PRINCIPAL_ID),
            principal_secret: read(ENV_PRINCIPAL_SECRET),
            redirect_url: read(ENV_REDIRECT_URL),
            policy: read(ENV_POLICY),
            derived: OnceCell::new(),
        })
    }

    /// Build settings directly; used by embedders that do not configure
    /// through the environment.
    pub fn new(
        tenant: impl Into<String>,
        application_id: impl Into<String>,
        redirect_url: impl Into<String>,
        policy: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            application_id: application_id.into(),
            application_secret: String::new(),
            principal_id: String::new(),
            principal_secret: String::new(),
            redirect_url: redirect_url.into(),
            policy: policy.into(),
            derived: OnceCell::new(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn application_secret(&self) -> &str {
        &self.application_secret
    }

    pub fn principal_secret(&self) -> &str {
        &self.principal_secret
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    fn derived(&self) -> &DerivedIdentifiers {
        self.derived.get_or_init(|| DerivedIdentifiers {
            application_id: normalise_identifier(&self.application_id),
            principal_id: Some(normalise_identifier(&self.principal_id)).filter(|s| !s.is_empty()),
        })
    }

    /// Normalised application (client) id, as it appears in `aud` claims.
    pub fn application_id(&self) -> &str {
        &self.derived().application_id
    }

    /// Normalised service principal id, if configured.
    pub fn principal_id(&self) -> Option<&str> {
        self.derived().principal_id.as_deref()
    }
}

/// Lowercase a GUID-style identifier and strip surrounding braces.
fn normalise_identifier(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_lowercase()
}

impl fmt::Debug for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<REDACTED>" };
        f.debug_struct("ApplicationSettings")
            .field("tenant", &self.tenant)
            .field("application_id", &self.application_id)
            .field("application_secret", &redact(&self.application_secret))
            .field("principal_id", &self.principal_id)
            .field("principal_secret", &redact(&self.principal_secret))
            .field("redirect_url", &self.redirect_url)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_required_variables() {
        let err = ApplicationSettings::from_lookup(lookup(&[(ENV_TENANT, "contoso")])).unwrap_err();
        assert!(err.to_string().contains(ENV_APPLICATION_ID));
    }

    #[test]
    fn test_derived_identifiers_are_normalised() {
        let settings = ApplicationSettings::from_lookup(lookup(&[
            (ENV_TENANT, "contoso"),
            (ENV_APPLICATION_ID, " {ABCDEF01-2345-6789-ABCD-EF0123456789} "),
            (ENV_POLICY, "B2C_1_signin"),
        ]))
        .unwrap();
        assert_eq!(settings.application_id(), "abcdef01-2345-6789-abcd-ef0123456789");
        assert_eq!(settings.principal_id(), None);
        assert_eq!(settings.policy(), "B2C_1_signin");
    }

    #[test]
    fn test_concurrent_first_access_agrees() {
        let settings = Arc::new(ApplicationSettings::new("t", "APP-ID", "https://app/cb", "p"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&settings);
                std::thread::spawn(move || s.application_id().to_string())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "app-id");
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = ApplicationSettings::from_lookup(lookup(&[
            (ENV_TENANT, "contoso"),
            (ENV_APPLICATION_ID, "app"),
            (ENV_APPLICATION_SECRET, "hunter2"),
        ]))
        .unwrap();
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<REDACTED>"));
    }
}
