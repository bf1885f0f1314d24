use super::{AuthenticationConfiguration, IdentityProvider};
use crate::error::{SecurityError, SecurityResult};
use crate::server::{expired_cookie, FilterRequest, FilterResponse, RequestAttribute};
use http::header::AUTHORIZATION;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Query parameter marking the return leg from the provider's logout page.
pub const FINISH_LOGOUT_PARAM: &str = "finishLogout";
/// Request attribute set once cookies have been cleared.
pub const LOGOUT_ATTRIBUTE: &str = "logout";

// Initiate, clear cookies, final redirect.
const MAX_STAGES: usize = 3;

/// Result of one logout stage.
#[derive(Debug, Clone, PartialEq)]
pub enum LogoutOutcome {
    /// Send this response to the client
    Redirect(FilterResponse),
    /// Re-dispatch the same request server-side; the response carries the
    /// headers produced so far
    Forward(FilterResponse),
}

/// Ends the session with both the identity provider and the application.
///
/// 1. No `finishLogout`: redirect to the provider's logout endpoint with a
///    `post_logout_redirect_uri` pointing back here plus `finishLogout=true`.
/// 2. `finishLogout=true`, no `logout` attribute: expire the token and
///    session cookies, invalidate the session, mark the request and forward.
/// 3. `logout` attribute present: redirect to the landing URL.
///
/// Any failure jumps straight to stage 3; logout never blocks the user.
pub struct LogoutFlow {
    provider: Arc<IdentityProvider>,
    config: AuthenticationConfiguration,
}

impl LogoutFlow {
    pub fn new(provider: Arc<IdentityProvider>, config: AuthenticationConfiguration) -> Self {
        Self { provider, config }
    }

    /// Where the provider should send the browser after its own logout.
    pub fn return_url(&self, request: &FilterRequest) -> String {
        let path = if request.path.is_empty() {
            self.config.logout_path.as_str()
        } else {
            request.path.as_str()
        };
        let base = match request.get_header("host") {
            Some(host) => {
                let scheme = request.get_header("x-forwarded-proto").unwrap_or("https");
                format!("{}://{}{}", scheme, host, path)
            }
            None => path.to_string(),
        };
        format!("{}?{}=true", base, FINISH_LOGOUT_PARAM)
    }

    /// Stage 1 redirect target.
    pub fn logout_url(&self, request: &FilterRequest) -> SecurityResult<String> {
        let configuration = self.provider.configuration()?;
        let return_url = self.return_url(request);
        let endpoint = match &configuration.logout_endpoint {
            Some(endpoint) => endpoint,
            // Nothing to end at the provider; clear local state directly.
            None => return Ok(return_url),
        };
        let mut url = Url::parse(endpoint)
            .map_err(|e| SecurityError::malformed("end_session_endpoint", e))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", &return_url);
        Ok(url.into())
    }

    fn landing(&self) -> LogoutOutcome {
        LogoutOutcome::Redirect(FilterResponse::redirect(self.config.landing_url.clone()))
    }

    fn initiate(&self, request: &FilterRequest) -> SecurityResult<LogoutOutcome> {
        let location = self.logout_url(request)?;
        let mut response = FilterResponse::redirect(location);
        if let Some(token) = request
            .get_cookie(&self.config.token_cookie_name)
            .filter(|t| !t.is_empty())
        {
            response = response.with_header(AUTHORIZATION.as_str(), format!("Bearer {}", token));
        }
        info!("logout initiated");
        Ok(LogoutOutcome::Redirect(response))
    }

    fn clear_cookies(&self, request: &mut FilterRequest) -> LogoutOutcome {
        let mut response = FilterResponse::new(200);
        response.add_cookie(expired_cookie(&self.config.token_cookie_name));
        for name in &self.config.session_cookie_names {
            if request.get_cookie(name).is_some() {
                response.add_cookie(expired_cookie(name));
            }
        }
        request.invalidate_session();
        request.set_attribute(LOGOUT_ATTRIBUTE, RequestAttribute::Value(Value::Bool(true)));
        debug!(cookies = response.set_cookies.len(), "logout cookies expired");
        LogoutOutcome::Forward(response)
    }

    /// Execute exactly one stage for `request`.
    pub fn step(&self, request: &mut FilterRequest) -> LogoutOutcome {
        if request.attribute(LOGOUT_ATTRIBUTE).is_some() {
            info!("logout complete");
            return self.landing();
        }
        let finishing = request
            .parameter(FINISH_LOGOUT_PARAM)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if finishing {
            return self.clear_cookies(request);
        }
        match self.initiate(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "logout initiation failed; going to landing page");
                self.landing()
            }
        }
    }

    /// Run stages until one produces a client-visible response, carrying
    /// cookies set by forwarded stages into it.
    pub fn service(&self, request: &mut FilterRequest) -> FilterResponse {
        let mut pending_cookies = Vec::new();
        for _ in 0..MAX_STAGES {
            match self.step(request) {
                LogoutOutcome::Redirect(mut response) => {
                    pending_cookies.append(&mut response.set_cookies);
                    response.set_cookies = pending_cookies;
                    return response;
                }
                LogoutOutcome::Forward(mut response) => {
                    pending_cookies.append(&mut response.set_cookies);
                }
            }
        }
        let mut response = FilterResponse::redirect(self.config.landing_url.clone());
        response.set_cookies = pending_cookies;
        response
    }
}
