//! # Filter Module
//!
//! The request-path components that sit in front of the protected
//! application:
//!
//! - [`AuthenticationFilter`]: decides, per request, whether the caller holds
//!   a currently valid ID token and either continues the chain, redirects to
//!   the identity provider, or rejects.
//! - [`LogoutFlow`]: the three-stage logout endpoint.
//!
//! ## Lifecycle
//!
//! [`AuthenticationFilter::init`] loads the algorithm registry, creates the
//! cache service and its caches, and warms the discovery document.
//! [`Filter::destroy`] stops the cache sweeper. Between the two, every shared
//! structure is either read-only or guarded by its own cache lock.
//!
//! ## Sign-in callback
//!
//! The provider form-posts the ID token back to the redirect URL. A request
//! carrying a posted token is a callback: the token must echo the nonce from
//! the login redirect's nonce cookie, and once verified it is stored in the
//! token cookie before the browser is sent back to `state`.
//!
//! ## Responses
//!
//! | Decision          | Response                                       |
//! |-------------------|------------------------------------------------|
//! | Active            | principal attached, chain continues            |
//! | Active (callback) | token cookie set, 302 to `state`               |
//! | Unauthenticated   | [`UnauthenticatedAction`] (default: 302 login) |
//! | InvalidToken      | 401 `{"error":"invalid_token"}`                |
//! | Unavailable       | 503 `{"error":"authentication_error"}`         |

mod actions;
mod config;
mod logout;
mod pipeline;
mod provider;

pub use actions::{
    RedirectToLogin, UnauthenticatedAction, UnauthenticatedCause, NONCE_COOKIE_MAX_AGE_SECONDS,
};
pub use config::{
    AuthenticationConfiguration, FilterConfig, DEFAULT_SECURITY_CACHE_SIZE,
    PARAM_ALGORITHM_CONFIGURATION, PARAM_AUTHENTICATION_CONFIGURATION, PARAM_SECURITY_CACHE_SIZE,
};
pub use logout::{LogoutFlow, LogoutOutcome, FINISH_LOGOUT_PARAM, LOGOUT_ATTRIBUTE};
pub use pipeline::{AuthDecision, AuthenticationFilter};
pub use provider::{IdentityProvider, KEY_RELOAD_MIN_INTERVAL};

use crate::server::{FilterRequest, FilterResponse};
use serde_json::json;

/// A request interceptor with a container-managed lifecycle.
pub trait Filter: Send + Sync {
    fn do_filter(&self, request: &mut FilterRequest, chain: &mut dyn FilterChain) -> FilterResponse;

    /// Release background resources. Called once by the container.
    fn destroy(&self) {}
}

/// The rest of the pipeline behind a filter.
pub trait FilterChain {
    fn proceed(&mut self, request: &mut FilterRequest) -> FilterResponse;
}

impl<F> FilterChain for F
where
    F: FnMut(&mut FilterRequest) -> FilterResponse,
{
    fn proceed(&mut self, request: &mut FilterRequest) -> FilterResponse {
        self(request)
    }
}

pub(crate) fn invalid_token_response() -> FilterResponse {
    FilterResponse::json(401, json!({ "error": "invalid_token" }))
}

pub(crate) fn authentication_error_response() -> FilterResponse {
    FilterResponse::json(503, json!({ "error": "authentication_error" }))
}
