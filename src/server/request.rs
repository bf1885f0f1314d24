use crate::token::Principal;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Request attribute under which the authenticated [`Principal`] is stored.
pub const PRINCIPAL_ATTRIBUTE: &str = "principal";

/// A value attached to a request by a filter for later stages.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestAttribute {
    Principal(Arc<Principal>),
    Value(Value),
}

/// The slice of an inbound HTTP request the filters need.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub method: Method,
    /// Path and query exactly as received
    pub uri: String,
    pub path: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub form_params: HashMap<String, String>,
    attributes: HashMap<String, RequestAttribute>,
    session_invalidated: bool,
}

/// Parse the `Cookie` header into name/value pairs.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let value = parts.next().unwrap_or("").trim().trim_matches('"');
                    Some((name.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse everything after `?` as `application/x-www-form-urlencoded`.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.split_once('?') {
        Some((_, query)) => parse_form(query),
        None => HashMap::new(),
    }
}

fn parse_form(encoded: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl FilterRequest {
    /// Build a request for `uri` (path plus optional query).
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let path = uri.split('?').next().unwrap_or("/").to_string();
        let query_params = parse_query_params(&uri);
        Self {
            method,
            uri,
            path,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            query_params,
            form_params: HashMap::new(),
            attributes: HashMap::new(),
            session_invalidated: false,
        }
    }

    /// Convert from an `http::Request`, reading headers, cookies and query.
    pub fn from_http<B>(req: &http::Request<B>) -> Self {
        let uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let mut request = Self::new(req.method().clone(), uri);
        for (name, value) in req.headers() {
            if let Ok(v) = value.to_str() {
                request.headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        request.cookies = parse_cookies(&request.headers);
        request
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        if name.eq_ignore_ascii_case("cookie") {
            self.cookies = parse_cookies(&self.headers);
        }
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Attach an `application/x-www-form-urlencoded` body.
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.form_params = parse_form(body);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// A request parameter from the query string or, failing that, the form body.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .or_else(|| self.form_params.get(name))
            .map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&RequestAttribute> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: RequestAttribute) {
        self.attributes.insert(name.into(), value);
    }

    /// The principal attached by the authentication filter, if any.
    pub fn principal(&self) -> Option<&Principal> {
        match self.attributes.get(PRINCIPAL_ATTRIBUTE) {
            Some(RequestAttribute::Principal(p)) => Some(p),
            _ => None,
        }
    }

    /// Drop the server-side session. The container owns session storage; this
    /// only records the instruction.
    pub fn invalidate_session(&mut self) {
        self.session_invalidated = true;
    }

    pub fn session_invalidated(&self) -> bool {
        self.session_invalidated
    }
}
