//! ID token parsing, verification and freshness classification.
//!
//! Parsing and verification are separate steps. [`Token::parse`] decomposes
//! the compact JWT without trusting it, which is enough to find the signing
//! key and the algorithm. [`Token::verify`] then performs the cryptographic
//! check and the issuer/audience/required-claim checks with `jsonwebtoken`.
//! Expiry is not enforced by `jsonwebtoken`; [`Token::freshness`] classifies
//! it separately. An expired but genuine token leads to re-authentication,
//! a forged one to a 401.

use crate::discovery::Key;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Claims every accepted ID token must carry.
pub const REQUIRED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp"];

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a compact JWT, or header/claims are not valid JSON
    Structure { detail: String },
    /// Header has no `kid`
    MissingKeyId,
    /// `kid` is not in the current key set
    UnknownKey { kid: String },
    /// The signing key's `nbf` is still in the future
    KeyNotYetValid { kid: String, not_before: i64 },
    /// No key set could be obtained, so nothing can be verified
    KeysUnavailable { detail: String },
    /// Algorithm not advertised by the provider or not registered locally
    UnsupportedAlgorithm { alg: String },
    /// Signature does not match
    InvalidSignature,
    /// `iss` does not match the discovered issuer
    InvalidIssuer { expected: String },
    /// `aud` does not contain the application id
    InvalidAudience { expected: String },
    /// A claim in [`REQUIRED_CLAIMS`] is absent
    MissingClaim { claim: String },
    /// Posted token's `nonce` differs from the one issued with the login redirect
    NonceMismatch,
}

impl TokenError {
    /// Short stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Structure { .. } => "structure",
            TokenError::MissingKeyId => "missing_kid",
            TokenError::UnknownKey { .. } => "unknown_key",
            TokenError::KeyNotYetValid { .. } => "key_not_yet_valid",
            TokenError::KeysUnavailable { .. } => "keys_unavailable",
            TokenError::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::InvalidIssuer { .. } => "invalid_issuer",
            TokenError::InvalidAudience { .. } => "invalid_audience",
            TokenError::MissingClaim { .. } => "missing_claim",
            TokenError::NonceMismatch => "nonce_mismatch",
        }
    }

    /// Emit one structured warning describing the rejection.
    pub fn log(&self) {
        match self {
            TokenError::Structure { detail } => {
                warn!(reason = self.kind(), %detail, "token rejected: malformed");
            }
            TokenError::MissingKeyId => {
                warn!(reason = self.kind(), "token rejected: no 'kid' in header");
            }
            TokenError::UnknownKey { kid } => {
                warn!(reason = self.kind(), %kid, "token rejected: key not in current key set");
            }
            TokenError::KeyNotYetValid { kid, not_before } => {
                warn!(reason = self.kind(), %kid, nbf = not_before, "token rejected: signing key not yet valid");
            }
            TokenError::KeysUnavailable { detail } => {
                warn!(reason = self.kind(), %detail, "token rejected: key set unavailable");
            }
            TokenError::UnsupportedAlgorithm { alg } => {
                warn!(reason = self.kind(), %alg, "token rejected: unsupported algorithm");
            }
            TokenError::InvalidSignature => {
                warn!(reason = self.kind(), "token rejected: invalid signature");
            }
            TokenError::InvalidIssuer { expected } => {
                warn!(reason = self.kind(), %expected, "token rejected: issuer mismatch");
            }
            TokenError::InvalidAudience { expected } => {
                warn!(reason = self.kind(), %expected, "token rejected: audience mismatch");
            }
            TokenError::MissingClaim { claim } => {
                warn!(reason = self.kind(), %claim, "token rejected: missing required claim");
            }
            TokenError::NonceMismatch => {
                warn!(reason = self.kind(), "token rejected: nonce does not match login request");
            }
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Structure { detail } => write!(f, "malformed token: {}", detail),
            TokenError::MissingKeyId => write!(f, "token header has no key id"),
            TokenError::UnknownKey { kid } => write!(f, "unknown signing key '{}'", kid),
            TokenError::KeyNotYetValid { kid, not_before } => {
                write!(f, "signing key '{}' not valid before {}", kid, not_before)
            }
            TokenError::KeysUnavailable { detail } => write!(f, "key set unavailable: {}", detail),
            TokenError::UnsupportedAlgorithm { alg } => write!(f, "unsupported algorithm '{}'", alg),
            TokenError::InvalidSignature => write!(f, "invalid signature"),
            TokenError::InvalidIssuer { expected } => write!(f, "issuer is not '{}'", expected),
            TokenError::InvalidAudience { expected } => write!(f, "audience does not include '{}'", expected),
            TokenError::MissingClaim { claim } => write!(f, "missing required claim '{}'", claim),
            TokenError::NonceMismatch => write!(f, "nonce does not match the login request"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Position of a verified token's lifetime relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// `nbf <= now < exp`
    Active,
    /// `now >= exp`
    Expired,
    /// `now < nbf`
    NotYetValid,
}

/// A decomposed, not yet trusted, compact JWT.
#[derive(Debug, Clone)]
pub struct Token {
    raw: String,
    algorithm: Algorithm,
    key_id: Option<String>,
    issuer: Option<String>,
    subject: Option<String>,
    audience: Vec<String>,
    expiry: Option<i64>,
    not_before: Option<i64>,
    signature: Vec<u8>,
    claims: Map<String, Value>,
}

fn structure(detail: impl fmt::Display) -> TokenError {
    TokenError::Structure {
        detail: detail.to_string(),
    }
}

fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Option<i64> {
    match claims.get(name)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn audience_claim(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get("aud") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl Token {
    /// Decompose a compact JWT. Performs no cryptographic checks.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(structure(format!("expected 3 segments, found {}", parts.len())));
        }
        let header = jsonwebtoken::decode_header(raw).map_err(structure)?;
        let payload = URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .map_err(|e| structure(format!("claims segment: {}", e)))?;
        let claims: Map<String, Value> = serde_json::from_slice(&payload)
            .map_err(|e| structure(format!("claims segment: {}", e)))?;
        let signature = URL_SAFE_NO_PAD
            .decode(parts[2].trim_end_matches('='))
            .map_err(|e| structure(format!("signature segment: {}", e)))?;

        Ok(Self {
            raw: raw.to_string(),
            algorithm: header.alg,
            key_id: header.kid.filter(|k| !k.is_empty()),
            issuer: claims.get("iss").and_then(Value::as_str).map(str::to_string),
            subject: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            audience: audience_claim(&claims),
            expiry: numeric_claim(&claims, "exp"),
            not_before: numeric_claim(&claims, "nbf"),
            signature,
            claims,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Header `alg` as it appears on the wire.
    pub fn algorithm_name(&self) -> String {
        format!("{:?}", self.algorithm)
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn expiry(&self) -> Option<i64> {
        self.expiry
    }

    pub fn not_before(&self) -> Option<i64> {
        self.not_before
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Verify the signature with `key` and the claims against `validation`.
    pub fn verify(&self, key: &Key, validation: &Validation) -> Result<(), TokenError> {
        let decoding_key = key.decoding_key().map_err(|e| TokenError::KeysUnavailable {
            detail: e.to_string(),
        })?;
        match jsonwebtoken::decode::<Value>(&self.raw, &decoding_key, validation) {
            Ok(_) => {
                debug!(kid = %key.name, "token signature verified");
                Ok(())
            }
            Err(e) => Err(match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidIssuer => TokenError::InvalidIssuer {
                    expected: validation
                        .iss
                        .as_ref()
                        .and_then(|set| set.iter().next().cloned())
                        .unwrap_or_default(),
                },
                ErrorKind::InvalidAudience => TokenError::InvalidAudience {
                    expected: validation
                        .aud
                        .as_ref()
                        .and_then(|set| set.iter().next().cloned())
                        .unwrap_or_default(),
                },
                ErrorKind::MissingRequiredClaim(claim) => TokenError::MissingClaim {
                    claim: claim.clone(),
                },
                ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm {
                    alg: self.algorithm_name(),
                },
                _ => structure(e),
            }),
        }
    }

    /// Classify the token's lifetime at `now` (Unix seconds).
    ///
    /// A token without `exp` is never active.
    pub fn freshness(&self, now: i64, leeway: u64) -> Freshness {
        let leeway = leeway as i64;
        if let Some(nbf) = self.not_before {
            if now + leeway < nbf {
                return Freshness::NotYetValid;
            }
        }
        match self.expiry {
            Some(exp) if now < exp + leeway => Freshness::Active,
            _ => Freshness::Expired,
        }
    }
}

/// `jsonwebtoken` validation for an ID token signed with `algorithm`.
///
/// Time claims are left to [`Token::freshness`]. The audience is only
/// checked when an application id is configured.
pub fn validation_for(algorithm: Algorithm, issuer: &str, audience: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(REQUIRED_CLAIMS);
    validation.set_issuer(&[issuer]);
    match audience {
        Some(aud) if !aud.is_empty() => validation.set_audience(&[aud]),
        _ => validation.validate_aud = false,
    }
    validation
}

/// The authenticated user, as handed to downstream handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expiry: i64,
    pub not_before: Option<i64>,
    pub key_id: String,
    pub claims: Map<String, Value>,
}

impl Principal {
    /// Build from a token that has passed [`Token::verify`].
    pub fn from_verified(token: &Token) -> Self {
        Self {
            subject: token.subject.clone().unwrap_or_default(),
            issuer: token.issuer.clone().unwrap_or_default(),
            audience: token.audience.clone(),
            expiry: token.expiry.unwrap_or_default(),
            not_before: token.not_before,
            key_id: token.key_id.clone().unwrap_or_default(),
            claims: token.claims.clone(),
        }
    }

    /// A claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Same classification as [`Token::freshness`], for cached principals.
    pub fn freshness(&self, now: i64, leeway: u64) -> Freshness {
        let leeway = leeway as i64;
        match self.not_before {
            Some(nbf) if now + leeway < nbf => Freshness::NotYetValid,
            _ if now < self.expiry + leeway => Freshness::Active,
            _ => Freshness::Expired,
        }
    }
}
