#![allow(dead_code)]

//! Shared helpers for integration tests: a mock identity provider served by
//! `tiny_http`, token minting with the fixture keys, and filter construction.

use aadgate::clock::{Clock, ManualClock};
use aadgate::filter::{AuthenticationFilter, FilterConfig, PARAM_AUTHENTICATION_CONFIGURATION};
use aadgate::settings::ApplicationSettings;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

pub const TENANT: &str = "tenant";
pub const POLICY: &str = "B2C_1_signin";
pub const APP_ID: &str = "6e3c8b4a-0d5f-4c61-9a55-2f1de0c3b7aa";
pub const REDIRECT_URL: &str = "https://app.example.com/callback";

pub const KID: &str = "test-key-1";
pub const OTHER_KID: &str = "other-key";

pub fn private_pem() -> &'static [u8] {
    include_bytes!("../fixtures/rsa_private.pem")
}

pub fn other_private_pem() -> &'static [u8] {
    include_bytes!("../fixtures/other_private.pem")
}

pub fn jwks() -> String {
    include_str!("../fixtures/rsa_jwks.json").to_string()
}

pub fn other_jwks() -> String {
    include_str!("../fixtures/other_jwks.json").to_string()
}

struct State {
    jwks: Mutex<String>,
    fail_discovery: AtomicBool,
    discovery_hits: AtomicUsize,
    jwks_hits: AtomicUsize,
}

/// In-process identity provider publishing a discovery document and a key
/// set on `127.0.0.1:<ephemeral>`.
pub struct MockIdp {
    pub base: String,
    server: Arc<tiny_http::Server>,
    state: Arc<State>,
}

impl MockIdp {
    pub fn start() -> Self {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let base = format!("http://127.0.0.1:{}", port);
        let state = Arc::new(State {
            jwks: Mutex::new(jwks()),
            fail_discovery: AtomicBool::new(false),
            discovery_hits: AtomicUsize::new(0),
            jwks_hits: AtomicUsize::new(0),
        });

        let worker_server = Arc::clone(&server);
        let worker_state = Arc::clone(&state);
        let worker_base = base.clone();
        thread::spawn(move || {
            for request in worker_server.incoming_requests() {
                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or("").to_string();
                let (status, body) = if path == format!("/{}/v2.0/.well-known/openid-configuration", TENANT) {
                    worker_state.discovery_hits.fetch_add(1, Ordering::SeqCst);
                    if worker_state.fail_discovery.load(Ordering::SeqCst) {
                        (500, "{\"error\":\"boom\"}".to_string())
                    } else {
                        (200, discovery_document(&worker_base).to_string())
                    }
                } else if path == format!("/{}/discovery/v2.0/keys", TENANT) {
                    worker_state.jwks_hits.fetch_add(1, Ordering::SeqCst);
                    (200, worker_state.jwks.lock().unwrap().clone())
                } else {
                    (404, "{}".to_string())
                };
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(
                        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                            .unwrap(),
                    );
                let _ = request.respond(response);
            }
        });

        Self { base, server, state }
    }

    pub fn issuer(&self) -> String {
        format!("{}/{}/v2.0/", self.base, TENANT)
    }

    pub fn authorization_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.base, TENANT)
    }

    pub fn logout_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/logout", self.base, TENANT)
    }

    pub fn set_jwks(&self, body: String) {
        *self.state.jwks.lock().unwrap() = body;
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.state.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub fn discovery_hits(&self) -> usize {
        self.state.discovery_hits.load(Ordering::SeqCst)
    }

    pub fn jwks_hits(&self) -> usize {
        self.state.jwks_hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockIdp {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn discovery_document(base: &str) -> Value {
    json!({
        "issuer": format!("{}/{}/v2.0/", base, TENANT),
        "authorization_endpoint": format!("{}/{}/oauth2/v2.0/authorize?p={}", base, TENANT, POLICY.to_lowercase()),
        "end_session_endpoint": format!("{}/{}/oauth2/v2.0/logout?p={}", base, TENANT, POLICY.to_lowercase()),
        "jwks_uri": format!("{}/{}/discovery/v2.0/keys?p={}", base, TENANT, POLICY.to_lowercase()),
        "response_modes_supported": ["query", "fragment", "form_post"],
        "response_types_supported": ["code", "id_token", "code id_token"],
        "id_token_signing_alg_values_supported": ["RS256"]
    })
}

pub fn settings() -> ApplicationSettings {
    ApplicationSettings::new(TENANT, APP_ID, REDIRECT_URL, POLICY)
}

pub fn filter_config(idp: &MockIdp, extra: Value) -> FilterConfig {
    let mut auth = json!({
        "authority": idp.base,
        "sweepIntervalSeconds": 0,
        "connectTimeoutMs": 500,
        "readTimeoutMs": 1000,
        "excludedPaths": ["/health"]
    });
    if let (Some(target), Some(extra)) = (auth.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    FilterConfig::new().with_param(PARAM_AUTHENTICATION_CONFIGURATION, auth.to_string())
}

pub fn filter(idp: &MockIdp, clock: &Arc<ManualClock>) -> AuthenticationFilter {
    AuthenticationFilter::init_with_clock(
        &filter_config(idp, json!({})),
        settings(),
        Arc::clone(clock) as Arc<dyn Clock>,
    )
    .unwrap()
}

/// Mint an RS256 token.
pub fn mint(kid: &str, pem: &[u8], claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

/// Claims for a token valid for `lifetime_secs` from the clock's now.
pub fn claims(idp: &MockIdp, clock: &ManualClock, lifetime_secs: i64) -> Value {
    let now = clock.unix_seconds();
    json!({
        "iss": idp.issuer(),
        "sub": "user-42",
        "aud": APP_ID,
        "iat": now,
        "nbf": now - 5,
        "exp": now + lifetime_secs,
        "name": "Ada Lovelace",
        "emails": ["ada@example.com"]
    })
}

pub fn valid_token(idp: &MockIdp, clock: &ManualClock) -> String {
    mint(KID, private_pem(), &claims(idp, clock, 3600))
}
