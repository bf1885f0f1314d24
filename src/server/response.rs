use http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;

const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Response produced by a filter or by the chain behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    /// One entry per `Set-Cookie` header
    pub set_cookies: Vec<String>,
    pub body: Value,
}

/// `Set-Cookie` value that removes `name` from the browser.
pub fn expired_cookie(name: &str) -> String {
    format!(
        "{}=; Max-Age=0; Path=/; HttpOnly; Secure; Expires={}",
        name, EPOCH_HTTP_DATE
    )
}

/// `Set-Cookie` value for a host-wide `HttpOnly; Secure` cookie.
pub fn secure_cookie(name: &str, value: &str, same_site: &str, max_age: Option<u64>) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; Secure; SameSite={}", name, value, same_site);
    if let Some(seconds) = max_age {
        cookie.push_str(&format!("; Max-Age={}", seconds));
    }
    cookie
}

impl FilterResponse {
    /// Empty response with `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            set_cookies: Vec::new(),
            body: Value::Null,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn json(status: u16, body: Value) -> Self {
        let mut res = Self::new(status);
        res.headers
            .insert(CONTENT_TYPE.as_str().to_string(), "application/json".to_string());
        res.body = body;
        res
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        let mut res = Self::new(302);
        res.headers.insert(LOCATION.as_str().to_string(), location.into());
        res
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn add_cookie(&mut self, cookie: impl Into<String>) {
        self.set_cookies.push(cookie.into());
    }

    /// Convert to an `http::Response` with a JSON (or empty) body.
    pub fn into_http(self) -> http::Response<String> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.body {
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let mut builder = http::Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        for cookie in &self.set_cookies {
            builder = builder.header(SET_COOKIE, cookie.as_str());
        }
        match builder.body(body) {
            Ok(res) => res,
            Err(_) => {
                let mut res = http::Response::new(String::new());
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expired_cookie_format() {
        let cookie = expired_cookie("id_token");
        assert!(cookie.starts_with("id_token=; Max-Age=0"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn test_secure_cookie_format() {
        assert_eq!(
            secure_cookie("id_token", "abc.def.ghi", "Lax", None),
            "id_token=abc.def.ghi; Path=/; HttpOnly; Secure; SameSite=Lax"
        );
        assert!(secure_cookie("aadgate_nonce", "n", "None", Some(600)).ends_with("; SameSite=None; Max-Age=600"));
    }

    #[test]
    fn test_redirect() {
        let res = FilterResponse::redirect("https://idp/authorize");
        assert_eq!(res.status, 302);
        assert!(res.is_redirect());
        assert_eq!(res.location(), Some("https://idp/authorize"));
    }

    #[test]
    fn test_into_http_carries_cookies() {
        let mut res = FilterResponse::json(401, json!({"error": "invalid_token"}));
        res.add_cookie(expired_cookie("SESSION"));
        res.add_cookie(expired_cookie("id_token"));
        let http_res = res.into_http();
        assert_eq!(http_res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(http_res.headers().get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(http_res.body(), r#"{"error":"invalid_token"}"#);
    }
}
