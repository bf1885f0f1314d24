use super::authentication_error_response;
use crate::discovery::Configuration;
use crate::error::{SecurityError, SecurityResult};
use crate::server::{secure_cookie, FilterRequest, FilterResponse};
use crate::settings::ApplicationSettings;
use std::fmt;
use tracing::{error, info};
use ulid::Ulid;
use url::Url;

/// Why a request has to (re-)authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthenticatedCause {
    /// No token cookie
    NoToken,
    /// The identity provider posted back an `error` parameter
    IdpError {
        error: String,
        description: Option<String>,
    },
    /// Genuine token past its expiry
    Expired,
    /// Genuine token before its not-before
    NotYetValid,
}

impl UnauthenticatedCause {
    pub fn is_idp_error(&self) -> bool {
        matches!(self, UnauthenticatedCause::IdpError { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnauthenticatedCause::NoToken => "no_token",
            UnauthenticatedCause::IdpError { .. } => "idp_error",
            UnauthenticatedCause::Expired => "expired",
            UnauthenticatedCause::NotYetValid => "not_yet_valid",
        }
    }
}

impl fmt::Display for UnauthenticatedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnauthenticatedCause::IdpError { error, .. } => write!(f, "idp_error({})", error),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What to do with a request that is not authenticated.
pub trait UnauthenticatedAction: Send + Sync {
    fn respond(
        &self,
        request: &FilterRequest,
        cause: &UnauthenticatedCause,
        configuration: &Configuration,
        settings: &ApplicationSettings,
    ) -> FilterResponse;
}

/// How long the login nonce cookie outlives the redirect.
pub const NONCE_COOKIE_MAX_AGE_SECONDS: u64 = 600;

/// Redirect the browser to the provider's authorization endpoint, asking for
/// an ID token to be form-posted back to the application's redirect URL.
///
/// The original request URI travels in `state` so the application can
/// resume once the user is signed in. A fresh nonce goes into the URL and
/// into a short-lived cookie; the posted token must echo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectToLogin {
    nonce_cookie_name: String,
}

impl Default for RedirectToLogin {
    fn default() -> Self {
        Self::new("aadgate_nonce")
    }
}

impl RedirectToLogin {
    pub fn new(nonce_cookie_name: impl Into<String>) -> Self {
        Self {
            nonce_cookie_name: nonce_cookie_name.into(),
        }
    }

    pub fn nonce_cookie_name(&self) -> &str {
        &self.nonce_cookie_name
    }

    pub fn login_url(
        &self,
        request: &FilterRequest,
        cause: &UnauthenticatedCause,
        nonce: &str,
        configuration: &Configuration,
        settings: &ApplicationSettings,
    ) -> SecurityResult<String> {
        let mut url = Url::parse(&configuration.authentication_endpoint).map_err(|e| {
            SecurityError::malformed("authorization_endpoint", e)
        })?;
        let has_policy = url.query_pairs().any(|(k, _)| k == "p");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", settings.application_id())
                .append_pair("response_type", "id_token")
                .append_pair("response_mode", "form_post")
                .append_pair("scope", "openid")
                .append_pair("nonce", nonce)
                .append_pair("state", &request.uri);
            if !settings.redirect_url().is_empty() {
                query.append_pair("redirect_uri", settings.redirect_url());
            }
            if !settings.policy().is_empty() && !has_policy {
                query.append_pair("p", settings.policy());
            }
            if cause.is_idp_error() {
                query.append_pair("prompt", "login");
            }
        }
        Ok(url.into())
    }
}

impl UnauthenticatedAction for RedirectToLogin {
    fn respond(
        &self,
        request: &FilterRequest,
        cause: &UnauthenticatedCause,
        configuration: &Configuration,
        settings: &ApplicationSettings,
    ) -> FilterResponse {
        if let UnauthenticatedCause::IdpError { error, description } = cause {
            info!(%error, description = description.as_deref().unwrap_or(""), "identity provider reported an error");
        }
        let nonce = Ulid::new().to_string();
        match self.login_url(request, cause, &nonce, configuration, settings) {
            Ok(location) => {
                info!(cause = %cause, "redirecting to login");
                let mut response = FilterResponse::redirect(location);
                // Sent back on the provider's cross-site form post.
                response.add_cookie(secure_cookie(
                    &self.nonce_cookie_name,
                    &nonce,
                    "None",
                    Some(NONCE_COOKIE_MAX_AGE_SECONDS),
                ));
                response
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "cannot build login redirect");
                authentication_error_response()
            }
        }
    }
}
