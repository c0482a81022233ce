//! Request facts.
//!
//! Matchers and condition expressions read requests only through
//! [`RequestFacts`]. [`RequestSnapshot`] is an owned implementation that can be
//! deserialized from JSON; `http::Request<B>` is supported directly, with the
//! facts HTTP does not carry read from request extensions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// The closed set of facts the engine reads from a request.
pub trait RequestFacts {
    fn method(&self) -> &str;
    fn path(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<String>;
    fn auth_scheme(&self) -> Option<String>;
    fn cookie(&self, name: &str) -> Option<String>;
    /// Every value of a header, in order.
    fn headers(&self, name: &str) -> Vec<String>;
    /// Every value of a query parameter, in order.
    fn parameters(&self, name: &str) -> Vec<String>;
    fn remote_address(&self) -> Option<String>;
    /// Preferred locales, most preferred first.
    fn locales(&self) -> Vec<String>;
    fn is_user_in_role(&self, role: &str) -> bool;
    fn user_principal(&self) -> Option<String>;
    fn request_uri(&self) -> String;
    fn session_id(&self) -> Option<String>;
}

/// Authenticated caller, stored in `http::Request` extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
}

/// Session id, stored in `http::Request` extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

/// Server-side request attributes, stored in `http::Request` extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAttributes(pub BTreeMap<String, String>);

/// An owned, framework-independent view of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub cookies: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, Vec<String>>,
    pub attributes: BTreeMap<String, String>,
    pub locales: Vec<String>,
    pub remote_address: Option<String>,
    pub auth_scheme: Option<String>,
    pub principal: Option<String>,
    pub roles: Vec<String>,
    pub session_id: Option<String>,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            parameters: BTreeMap::new(),
            attributes: BTreeMap::new(),
            locales: Vec::new(),
            remote_address: None,
            auth_scheme: None,
            principal: None,
            roles: Vec::new(),
            session_id: None,
        }
    }
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.entry(name.into()).or_default().push(value.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locales.push(locale.into());
        self
    }

    #[must_use]
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_principal(mut self, name: impl Into<String>) -> Self {
        self.principal = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }
}

impl RequestFacts for RequestSnapshot {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    fn auth_scheme(&self) -> Option<String> {
        self.auth_scheme.clone().or_else(|| {
            RequestFacts::headers(self, "Authorization")
                .first()
                .and_then(|v| auth_scheme_of(v))
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn headers(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.iter().cloned())
            .collect()
    }

    fn parameters(&self, name: &str) -> Vec<String> {
        self.parameters.get(name).cloned().unwrap_or_default()
    }

    fn remote_address(&self) -> Option<String> {
        self.remote_address.clone()
    }

    fn locales(&self) -> Vec<String> {
        if !self.locales.is_empty() {
            return self.locales.clone();
        }
        RequestFacts::headers(self, "Accept-Language")
            .iter()
            .flat_map(|v| parse_accept_language(v))
            .collect()
    }

    fn is_user_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    fn user_principal(&self) -> Option<String> {
        self.principal.clone()
    }

    fn request_uri(&self) -> String {
        self.path.clone()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }
}

impl<B> RequestFacts for http::Request<B> {
    fn method(&self) -> &str {
        http::Request::method(self).as_str()
    }

    fn path(&self) -> &str {
        self.uri().path()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.extensions()
            .get::<RequestAttributes>()
            .and_then(|a| a.0.get(name).cloned())
    }

    fn auth_scheme(&self) -> Option<String> {
        RequestFacts::headers(self, http::header::AUTHORIZATION.as_str())
            .first()
            .and_then(|v| auth_scheme_of(v))
    }

    fn cookie(&self, name: &str) -> Option<String> {
        RequestFacts::headers(self, http::header::COOKIE.as_str())
            .iter()
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    fn headers(&self, name: &str) -> Vec<String> {
        http::Request::headers(self)
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    fn parameters(&self, name: &str) -> Vec<String> {
        self.uri()
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
            .collect()
    }

    fn remote_address(&self) -> Option<String> {
        self.extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }

    fn locales(&self) -> Vec<String> {
        RequestFacts::headers(self, http::header::ACCEPT_LANGUAGE.as_str())
            .iter()
            .flat_map(|v| parse_accept_language(v))
            .collect()
    }

    fn is_user_in_role(&self, role: &str) -> bool {
        self.extensions()
            .get::<Principal>()
            .is_some_and(|p| p.roles.iter().any(|r| r == role))
    }

    fn user_principal(&self) -> Option<String> {
        self.extensions().get::<Principal>().map(|p| p.name.clone())
    }

    fn request_uri(&self) -> String {
        self.uri().path().to_string()
    }

    fn session_id(&self) -> Option<String> {
        self.extensions().get::<SessionId>().map(|s| s.0.clone())
    }
}

fn auth_scheme_of(authorization: &str) -> Option<String> {
    authorization
        .split_whitespace()
        .next()
        .map(str::to_string)
}

/// Locale tags from an `Accept-Language` value, quality weights dropped.
fn parse_accept_language(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_headers_case_insensitive() {
        let req = RequestSnapshot::new("GET", "/").with_header("Content-Type", "text/plain");
        assert_eq!(req.headers("content-type"), vec!["text/plain"]);
        assert!(req.headers("Accept").is_empty());
    }

    #[test]
    fn test_snapshot_locales_fall_back_to_header() {
        let req = RequestSnapshot::new("GET", "/").with_header("Accept-Language", "en-US,fr;q=0.5");
        assert_eq!(req.locales(), vec!["en-US", "fr"]);

        let req = RequestSnapshot::new("GET", "/").with_locale("de-DE");
        assert_eq!(req.locales(), vec!["de-DE"]);
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{"method":"POST","path":"/orders","roles":["ADMIN"],"cookies":{"sid":"1"}}"#;
        let req: RequestSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(RequestFacts::method(&req), "POST");
        assert!(req.is_user_in_role("ADMIN"));
        assert_eq!(RequestFacts::cookie(&req, "sid").as_deref(), Some("1"));
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_http_request_facts() {
        let mut req = http::Request::builder()
            .method("PUT")
            .uri("https://example.com/items/7?tag=a&tag=b&flag")
            .header("Cookie", "theme=dark; sid=abc")
            .header("Accept-Language", "en-GB, en;q=0.8, *;q=0.1")
            .header("Authorization", "Bearer token")
            .body(())
            .unwrap();
        req.extensions_mut().insert(Principal {
            name: "alice".to_string(),
            roles: vec!["GUEST".to_string()],
        });
        req.extensions_mut().insert(SessionId("s-1".to_string()));
        req.extensions_mut()
            .insert("10.0.0.9:4444".parse::<SocketAddr>().unwrap());

        assert_eq!(RequestFacts::method(&req), "PUT");
        assert_eq!(RequestFacts::path(&req), "/items/7");
        assert_eq!(req.parameters("tag"), vec!["a", "b"]);
        assert_eq!(req.parameters("flag"), vec![""]);
        assert_eq!(RequestFacts::cookie(&req, "sid").as_deref(), Some("abc"));
        assert_eq!(req.locales(), vec!["en-GB", "en"]);
        assert_eq!(req.auth_scheme().as_deref(), Some("Bearer"));
        assert!(req.is_user_in_role("GUEST"));
        assert_eq!(req.user_principal().as_deref(), Some("alice"));
        assert_eq!(req.session_id().as_deref(), Some("s-1"));
        assert_eq!(req.remote_address().as_deref(), Some("10.0.0.9"));
        assert_eq!(req.request_uri(), "/items/7");
        assert!(req.attribute("x").is_none());
    }
}
