//! JSON Web Key Set loader and parser.

use super::HttpFetcher;
use crate::error::{SecurityError, SecurityResult};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use jsonwebtoken::DecodingKey;
use serde_json::Value;
use std::collections::HashMap;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

// Some providers pad their base64url components, most do not.
const B64URL_ANY_PADDING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A named RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// `kid`
    pub name: String,
    /// `nbf`, seconds since the Unix epoch (0 when absent)
    pub not_before: i64,
    /// Big-endian modulus bytes
    pub modulus: Vec<u8>,
    /// Big-endian public exponent bytes
    pub exponent: Vec<u8>,
}

impl Key {
    /// Build a verification key for `jsonwebtoken`.
    pub fn decoding_key(&self) -> SecurityResult<DecodingKey> {
        let n = URL_SAFE_NO_PAD.encode(&self.modulus);
        let e = URL_SAFE_NO_PAD.encode(&self.exponent);
        DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| SecurityError::malformed(format!("key '{}'", self.name), err))
    }

    /// Whether the key's not-before has passed at `now` (Unix seconds).
    pub fn is_active(&self, now: i64) -> bool {
        now >= self.not_before
    }
}

/// Key name to [`Key`], built from exactly one key set document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    keys: HashMap<String, Key>,
}

impl KeyStore {
    pub fn get(&self, name: &str) -> Option<&Key> {
        self.keys.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Keys sorted by name.
    pub fn keys(&self) -> Vec<&Key> {
        let mut keys: Vec<&Key> = self.keys.values().collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        keys
    }
}

impl FromIterator<Key> for KeyStore {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(|k| (k.name.clone(), k)).collect(),
        }
    }
}

fn not_before(entry: &Value) -> i64 {
    match entry.get("nbf") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn parse_key(entry: &Value) -> Result<Key, String> {
    let kty = entry.get("kty").and_then(Value::as_str).unwrap_or("");
    if kty != "RSA" {
        return Err(format!("unsupported kty '{}'", kty));
    }
    let field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing '{}'", name))
    };
    let kid = field("kid")?;
    let modulus = B64URL_ANY_PADDING
        .decode(field("n")?)
        .map_err(|e| format!("bad modulus: {}", e))?;
    let exponent = B64URL_ANY_PADDING
        .decode(field("e")?)
        .map_err(|e| format!("bad exponent: {}", e))?;
    Ok(Key {
        name: kid.to_string(),
        not_before: not_before(entry),
        modulus,
        exponent,
    })
}

/// Convert a JWKS document into a [`KeyStore`].
///
/// Entries that are not usable RSA signing keys are skipped with a warning so
/// that one odd key does not take the whole set down.
pub fn parse_keys(document: &Value) -> SecurityResult<KeyStore> {
    if document.is_null() {
        return Err(SecurityError::precondition("key set document is null"));
    }
    let entries = document
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| SecurityError::malformed("key set document", "missing 'keys' array"))?;

    let mut store = KeyStore::default();
    for (index, entry) in entries.iter().enumerate() {
        match parse_key(entry) {
            Ok(key) => {
                debug!(kid = %key.name, nbf = key.not_before, "key parsed");
                store.keys.insert(key.name.clone(), key);
            }
            Err(reason) => {
                let kid = entry.get("kid").and_then(Value::as_str).unwrap_or("<none>");
                warn!(index, %kid, %reason, "skipping key set entry");
            }
        }
    }
    Ok(store)
}

/// Fetches key sets.
#[derive(Debug, Clone)]
pub struct KeyStoreLoader {
    fetcher: HttpFetcher,
}

impl KeyStoreLoader {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    /// GET the key set at `endpoint` and return the raw JSON tree.
    pub fn load(&self, endpoint: &str) -> SecurityResult<Value> {
        if endpoint.trim().is_empty() {
            return Err(SecurityError::precondition("key set endpoint is empty"));
        }
        self.fetcher.get_json(endpoint)
    }

    /// [`KeyStoreLoader::load`] followed by [`parse_keys`].
    pub fn load_key_store(&self, endpoint: &str) -> SecurityResult<KeyStore> {
        let store = self.load(endpoint).and_then(|doc| parse_keys(&doc))?;
        info!(url = %endpoint, keys = store.len(), "key set loaded");
        Ok(store)
    }

    /// Run [`KeyStoreLoader::load_key_store`] on a short-lived worker thread.
    /// Fails with a transport error when the worker cannot be spawned.
    pub fn load_async(&self, endpoint: &str) -> SecurityResult<JoinHandle<SecurityResult<KeyStore>>> {
        let loader = self.clone();
        let url = endpoint.to_string();
        std::thread::Builder::new()
            .name("aadgate-jwks".to_string())
            .spawn(move || loader.load_key_store(&url))
            .map_err(|e| {
                error!(url = %endpoint, error = %e, "cannot spawn key set worker");
                SecurityError::transport(endpoint, format!("cannot spawn key set worker: {}", e))
            })
    }
}
