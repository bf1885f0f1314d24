use super::{
    authentication_error_response, invalid_token_response, AuthenticationConfiguration, Filter,
    FilterChain, FilterConfig, IdentityProvider, LogoutFlow, RedirectToLogin, UnauthenticatedAction,
    UnauthenticatedCause,
};
use crate::algorithms::AlgorithmRegistry;
use crate::cache::{CacheService, CacheStats, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::discovery::{well_known_url, Configuration, HttpFetcher, KeyStore, KeyStoreLoader, WellKnownLoader};
use crate::error::SecurityError;
use crate::logging::{token_digest, token_fingerprint};
use crate::server::{
    expired_cookie, secure_cookie, FilterRequest, FilterResponse, RequestAttribute, PRINCIPAL_ATTRIBUTE,
};
use crate::settings::ApplicationSettings;
use crate::token::{validation_for, Freshness, Principal, Token, TokenError};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};
use ulid::Ulid;

const ROLE_CACHE_TTL_MINUTES: u64 = 30;
const METADATA_CACHE_TTL_MINUTES: u64 = 60;

/// Outcome of [`AuthenticationFilter::authenticate`].
#[derive(Debug, Clone)]
pub enum AuthDecision {
    /// Verified, currently valid token
    Active(Arc<Principal>),
    /// Caller has to sign in (again)
    Unauthenticated(UnauthenticatedCause),
    /// Token present but not acceptable
    InvalidToken(TokenError),
    /// Provider configuration could not be obtained
    Unavailable(SecurityError),
}

impl AuthDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthDecision::Active(_) => "active",
            AuthDecision::Unauthenticated(_) => "unauthenticated",
            AuthDecision::InvalidToken(_) => "invalid_token",
            AuthDecision::Unavailable(_) => "unavailable",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AuthDecision::Active(_))
    }

    /// JSON summary, without credentials.
    pub fn to_json(&self) -> Value {
        match self {
            AuthDecision::Active(principal) => json!({
                "decision": self.kind(),
                "subject": principal.subject,
                "issuer": principal.issuer,
                "audience": principal.audience,
                "expiry": principal.expiry,
                "kid": principal.key_id,
            }),
            AuthDecision::Unauthenticated(cause) => json!({
                "decision": self.kind(),
                "cause": cause.to_string(),
            }),
            AuthDecision::InvalidToken(e) => json!({
                "decision": self.kind(),
                "reason": e.kind(),
                "detail": e.to_string(),
            }),
            AuthDecision::Unavailable(e) => json!({
                "decision": self.kind(),
                "reason": e.kind(),
                "detail": e.to_string(),
            }),
        }
    }
}

/// OpenID Connect ID-token filter for Azure AD and Azure AD B2C.
pub struct AuthenticationFilter {
    settings: Arc<ApplicationSettings>,
    config: AuthenticationConfiguration,
    registry: AlgorithmRegistry,
    clock: Arc<dyn Clock>,
    cache_service: CacheService,
    role_cache: Arc<TtlCache<String, Arc<Principal>>>,
    provider: Arc<IdentityProvider>,
    action: Box<dyn UnauthenticatedAction>,
    logout: LogoutFlow,
}

impl AuthenticationFilter {
    /// Build the filter from container init parameters.
    pub fn init(config: &FilterConfig, settings: ApplicationSettings) -> Result<Self> {
        Self::init_with_clock(config, settings, Arc::new(SystemClock))
    }

    /// [`AuthenticationFilter::init`] with an explicit time source.
    pub fn init_with_clock(
        config: &FilterConfig,
        settings: ApplicationSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = AlgorithmRegistry::initialise(config.algorithm_configuration())
            .context("failed to load algorithmConfiguration")?;
        let auth = config
            .authentication_configuration()
            .context("failed to load authenticationConfiguration")?;
        let cache_size = config
            .security_cache_size()
            .context("failed to read securityCacheSize")?;

        let fetcher = HttpFetcher::new(
            auth.connect_timeout(),
            auth.read_timeout(),
            auth.allow_insecure_localhost,
        )
        .context("failed to build HTTP client")?;
        let discovery_url = well_known_url(&auth.authority, settings.tenant(), settings.policy())
            .context("failed to build discovery URL")?;
        fetcher
            .check_url(&discovery_url)
            .context("discovery URL rejected")?;

        let cache_service = CacheService::new(auth.sweep_interval(), Arc::clone(&clock));
        let role_cache = cache_service.create("roleCache", ROLE_CACHE_TTL_MINUTES, cache_size);
        let configuration_cache =
            cache_service.create("configurationCache", METADATA_CACHE_TTL_MINUTES, 1);
        let key_store_cache = cache_service.create("keyStoreCache", METADATA_CACHE_TTL_MINUTES, 1);

        let provider = Arc::new(IdentityProvider::new(
            WellKnownLoader::new(fetcher.clone(), discovery_url.clone()),
            KeyStoreLoader::new(fetcher),
            configuration_cache,
            key_store_cache,
            Arc::clone(&clock),
        ));
        let settings = Arc::new(settings);
        let logout = LogoutFlow::new(Arc::clone(&provider), auth.clone());

        // A provider outage at startup must not stop the application from
        // booting; requests fail closed until discovery succeeds.
        if let Err(e) = provider.configuration() {
            warn!(url = %discovery_url, kind = e.kind(), error = %e, "configuration warm-up failed");
        }

        info!(
            url = %discovery_url,
            tenant = %settings.tenant(),
            policy = %settings.policy(),
            role_cache_size = cache_size,
            "authentication filter initialised"
        );

        Ok(Self {
            settings,
            registry,
            clock,
            cache_service,
            role_cache,
            provider,
            action: Box::new(RedirectToLogin::new(auth.nonce_cookie_name.clone())),
            logout,
            config: auth,
        })
    }

    /// Replace the default login redirect.
    pub fn with_unauthenticated_action(mut self, action: Box<dyn UnauthenticatedAction>) -> Self {
        self.action = action;
        self
    }

    pub fn settings(&self) -> &ApplicationSettings {
        &self.settings
    }

    pub fn configuration(&self) -> &AuthenticationConfiguration {
        &self.config
    }

    pub fn provider(&self) -> &IdentityProvider {
        &self.provider
    }

    pub fn logout_flow(&self) -> &LogoutFlow {
        &self.logout
    }

    /// Counters for every cache the filter owns.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        vec![
            (self.role_cache.name().to_string(), self.role_cache.stats()),
            (
                self.provider.configuration_cache().name().to_string(),
                self.provider.configuration_cache().stats(),
            ),
            (
                self.provider.key_store_cache().name().to_string(),
                self.provider.key_store_cache().stats(),
            ),
        ]
    }

    /// Decide what to do with `request`. Has no side effects on the request.
    pub fn authenticate(&self, request: &FilterRequest) -> AuthDecision {
        if let Some(error) = request.parameter("error") {
            return AuthDecision::Unauthenticated(UnauthenticatedCause::IdpError {
                error: error.to_string(),
                description: request.parameter("error_description").map(str::to_string),
            });
        }
        match request.get_cookie(&self.config.token_cookie_name) {
            Some(raw) if !raw.trim().is_empty() => self.verify_token(raw.trim()),
            _ => AuthDecision::Unauthenticated(UnauthenticatedCause::NoToken),
        }
    }

    /// ID token the provider form-posted back after sign-in, if any.
    pub fn posted_token<'a>(&self, request: &'a FilterRequest) -> Option<&'a str> {
        if request.parameter("error").is_some() {
            return None;
        }
        request
            .form_params
            .get(&self.config.token_cookie_name)
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
    }

    /// Decide on a sign-in callback. The posted token must carry the nonce
    /// stored in the nonce cookie by the login redirect. Requests without a
    /// posted token fall back to [`AuthenticationFilter::authenticate`].
    pub fn authenticate_callback(&self, request: &FilterRequest) -> AuthDecision {
        let raw = match self.posted_token(request) {
            Some(raw) => raw,
            None => return self.authenticate(request),
        };
        let token = match Token::parse(raw) {
            Ok(t) => t,
            Err(e) => return AuthDecision::InvalidToken(e),
        };
        let expected = request
            .get_cookie(&self.config.nonce_cookie_name)
            .filter(|nonce| !nonce.is_empty());
        let echoed = token.claims().get("nonce").and_then(Value::as_str);
        if expected.is_none() || expected != echoed {
            return AuthDecision::InvalidToken(TokenError::NonceMismatch);
        }
        self.verify_token(raw)
    }

    /// Verify a raw ID token against the provider's current metadata.
    pub fn verify_token(&self, raw: &str) -> AuthDecision {
        let configuration = match self.provider.configuration() {
            Ok(c) => c,
            Err(e) => return AuthDecision::Unavailable(e),
        };
        let keys = match self.provider.key_store(&configuration) {
            Ok(k) => k,
            Err(e) => {
                return AuthDecision::InvalidToken(TokenError::KeysUnavailable {
                    detail: e.to_string(),
                })
            }
        };

        let now = self.clock.unix_seconds();
        let leeway = self.config.leeway_seconds;
        let fingerprint = token_fingerprint(raw);
        let digest = token_digest(raw);

        if let Some(principal) = self.role_cache.get(&digest) {
            if keys.contains(&principal.key_id) && principal.issuer == configuration.issuer {
                return match principal.freshness(now, leeway) {
                    Freshness::Active => {
                        debug!(%fingerprint, "role cache hit");
                        AuthDecision::Active(principal)
                    }
                    stale => {
                        self.role_cache.invalidate(&digest);
                        AuthDecision::Unauthenticated(unauthenticated_for(stale))
                    }
                };
            }
            debug!(%fingerprint, kid = %principal.key_id, "cached principal's key is gone; revalidating");
            self.role_cache.invalidate(&digest);
        }

        let token = match Token::parse(raw) {
            Ok(t) => t,
            Err(e) => return AuthDecision::InvalidToken(e),
        };
        let kid = match token.key_id() {
            Some(kid) => kid,
            None => return AuthDecision::InvalidToken(TokenError::MissingKeyId),
        };
        let alg_name = token.algorithm_name();
        let algorithm = match self.registry.resolve(&alg_name) {
            Some(alg) if configuration.supports_algorithm(&alg_name) => alg,
            _ => return AuthDecision::InvalidToken(TokenError::UnsupportedAlgorithm { alg: alg_name }),
        };
        let keys = self.keys_containing(kid, keys, &configuration);
        let key = match keys.get(kid) {
            Some(key) => key,
            None => {
                return AuthDecision::InvalidToken(TokenError::UnknownKey {
                    kid: kid.to_string(),
                })
            }
        };
        if !key.is_active(now) {
            return AuthDecision::InvalidToken(TokenError::KeyNotYetValid {
                kid: kid.to_string(),
                not_before: key.not_before,
            });
        }

        let validation = validation_for(
            algorithm,
            &configuration.issuer,
            Some(self.settings.application_id()),
        );
        if let Err(e) = token.verify(key, &validation) {
            return AuthDecision::InvalidToken(e);
        }

        match token.freshness(now, leeway) {
            Freshness::Active => {
                let principal = Arc::new(Principal::from_verified(&token));
                self.role_cache.put_if_absent(digest, Arc::clone(&principal));
                debug!(%fingerprint, %kid, subject = %principal.subject, "token verified");
                AuthDecision::Active(principal)
            }
            stale => {
                debug!(%fingerprint, freshness = ?stale, "token outside its validity window");
                AuthDecision::Unauthenticated(unauthenticated_for(stale))
            }
        }
    }

    /// `keys`, or a reloaded key set when `kid` is missing from it.
    fn keys_containing(&self, kid: &str, keys: Arc<KeyStore>, configuration: &Configuration) -> Arc<KeyStore> {
        if keys.contains(kid) {
            return keys;
        }
        match self.provider.reload_key_store(configuration) {
            Ok(Some(reloaded)) => reloaded,
            Ok(None) => keys,
            Err(e) => {
                warn!(%kid, kind = e.kind(), error = %e, "key set reload failed");
                keys
            }
        }
    }

    /// Store the posted token in the token cookie and send the browser back
    /// to where it was before sign-in.
    fn complete_sign_in(&self, request: &FilterRequest, principal: &Principal) -> FilterResponse {
        let target = request
            .parameter("state")
            .filter(|state| is_local_path(state))
            .unwrap_or(self.config.landing_url.as_str());
        let mut response = FilterResponse::redirect(target);
        if let Some(raw) = self.posted_token(request) {
            let max_age = (principal.expiry - self.clock.unix_seconds()).max(0) as u64;
            response.add_cookie(secure_cookie(&self.config.token_cookie_name, raw, "Lax", Some(max_age)));
        }
        response.add_cookie(expired_cookie(&self.config.nonce_cookie_name));
        info!(subject = %principal.subject, location = %target, "sign-in complete");
        response
    }

    fn respond_unauthenticated(&self, request: &FilterRequest, cause: &UnauthenticatedCause) -> FilterResponse {
        match self.provider.configuration() {
            Ok(configuration) => self.action.respond(request, cause, &configuration, &self.settings),
            Err(e) => {
                error!(kind = e.kind(), error = %e, "cannot redirect to login without configuration");
                authentication_error_response()
            }
        }
    }
}

/// Same-origin absolute path. Anything else could redirect off-site.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}

fn unauthenticated_for(freshness: Freshness) -> UnauthenticatedCause {
    match freshness {
        Freshness::NotYetValid => UnauthenticatedCause::NotYetValid,
        _ => UnauthenticatedCause::Expired,
    }
}

impl Filter for AuthenticationFilter {
    fn do_filter(&self, request: &mut FilterRequest, chain: &mut dyn FilterChain) -> FilterResponse {
        let span = info_span!(
            "authenticate",
            request_id = %Ulid::new(),
            method = %request.method,
            path = %request.path
        );
        let _entered = span.enter();

        if self.config.is_excluded(&request.path) {
            debug!("path excluded from authentication");
            return chain.proceed(request);
        }

        let callback = self.posted_token(request).is_some();
        let decision = {
            let req: &FilterRequest = request;
            let decide = || {
                if callback {
                    self.authenticate_callback(req)
                } else {
                    self.authenticate(req)
                }
            };
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(decide)) {
                Ok(decision) => decision,
                Err(_) => {
                    error!("authentication panicked");
                    return authentication_error_response();
                }
            }
        };

        match decision {
            AuthDecision::Active(principal) if callback => self.complete_sign_in(request, &principal),
            AuthDecision::Active(principal) => {
                request.set_attribute(PRINCIPAL_ATTRIBUTE, RequestAttribute::Principal(principal));
                chain.proceed(request)
            }
            AuthDecision::Unauthenticated(cause) => self.respond_unauthenticated(request, &cause),
            AuthDecision::InvalidToken(e) => {
                e.log();
                invalid_token_response()
            }
            AuthDecision::Unavailable(e) => {
                error!(kind = e.kind(), error = %e, "identity provider configuration unavailable");
                authentication_error_response()
            }
        }
    }

    fn destroy(&self) {
        self.cache_service.shutdown();
        info!("authentication filter destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_accepts_same_origin_paths() {
        assert!(is_local_path("/"));
        assert!(is_local_path("/reports?year=2024"));
    }

    #[test]
    fn test_local_path_rejects_off_site_targets() {
        assert!(!is_local_path("https://evil.example.com/"));
        assert!(!is_local_path("//evil.example.com/"));
        assert!(!is_local_path("/\\evil.example.com"));
        assert!(!is_local_path("/reports\r\nSet-Cookie: x=y"));
        assert!(!is_local_path("reports"));
    }
}
