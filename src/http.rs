//! Cookie transport seam
//!
//! The id manager never touches a concrete HTTP stack. It reads and stages
//! cookies through `CookieTransport`, which web framework adapters implement.
//! `CookieExchange` is a self-contained request/response pair used by tests
//! and by callers that manage headers themselves.

use std::collections::HashMap;

/// Outgoing cookie staged on a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCookie {
    /// Cookie name
    pub name: String,

    /// Cookie value
    pub value: String,

    /// `Path` attribute
    pub path: String,

    /// Expiry as Unix seconds; `None` for a browser-session cookie
    pub expires: Option<i64>,

    /// `Domain` attribute
    pub domain: Option<String>,

    /// `Secure` attribute
    pub secure: bool,

    /// `HttpOnly` attribute
    pub http_only: bool,
}

impl ResponseCookie {
    /// Create a session cookie with the given name, value and path
    pub fn new(name: impl Into<String>, value: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: path.into(),
            expires: None,
            domain: None,
            secure: false,
            http_only: false,
        }
    }

    /// `Expires` rendered as an HTTP date, if set and representable
    pub fn expires_http_date(&self) -> Option<String> {
        self.expires.and_then(http_date)
    }

    /// Render the `Set-Cookie` header value
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(expires) = self.expires_http_date() {
            header.push_str("; Expires=");
            header.push_str(&expires);
        }
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

/// Format Unix seconds as an RFC 7231 HTTP date
pub fn http_date(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Read incoming cookies and stage outgoing ones for one request
pub trait CookieTransport {
    /// Value of a cookie sent by the client
    fn request_cookie(&self, name: &str) -> Option<&str>;

    /// Cookie already staged on the response during this request
    fn response_cookie(&self, name: &str) -> Option<&ResponseCookie>;

    /// Stage a cookie on the response, replacing any with the same name
    fn set_response_cookie(&mut self, cookie: ResponseCookie);

    /// Path of the application root as seen by the client
    ///
    /// Under virtual hosting this is the effective mount path after
    /// rewriting, not the internal one.
    fn application_path(&self) -> &str;
}

/// In-memory request/response cookie pair
#[derive(Debug, Clone)]
pub struct CookieExchange {
    request_cookies: HashMap<String, String>,
    response_cookies: HashMap<String, ResponseCookie>,
    application_path: String,
}

impl Default for CookieExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieExchange {
    /// Create an exchange with no cookies, mounted at `/`
    pub fn new() -> Self {
        Self {
            request_cookies: HashMap::new(),
            response_cookies: HashMap::new(),
            application_path: "/".to_string(),
        }
    }

    /// Build an exchange from a raw `Cookie` request header
    ///
    /// Pairs without `=` are ignored; the first occurrence of a name wins.
    pub fn from_cookie_header(header: &str) -> Self {
        let mut exchange = Self::new();
        for pair in header.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                exchange
                    .request_cookies
                    .entry(name.to_string())
                    .or_insert_with(|| value.trim().trim_matches('"').to_string());
            }
        }
        exchange
    }

    /// Add an incoming cookie
    pub fn with_request_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_cookies.insert(name.into(), value.into());
        self
    }

    /// Set the application mount path
    pub fn with_application_path(mut self, path: impl Into<String>) -> Self {
        self.application_path = path.into();
        self
    }

    /// Change the mount path mid-request (virtual host rewriting)
    pub fn set_application_path(&mut self, path: impl Into<String>) {
        self.application_path = path.into();
    }

    /// All cookies staged on the response
    pub fn response_cookies(&self) -> impl Iterator<Item = &ResponseCookie> {
        self.response_cookies.values()
    }

    /// `Set-Cookie` header values for the staged cookies, sorted by name
    pub fn set_cookie_headers(&self) -> Vec<String> {
        let mut cookies: Vec<&ResponseCookie> = self.response_cookies.values().collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        cookies.iter().map(|c| c.to_header_value()).collect()
    }

    /// Next request from the same browser: staged cookies become incoming ones
    pub fn replay(&self) -> Self {
        let mut next = Self::new().with_application_path(self.application_path.clone());
        next.request_cookies = self.request_cookies.clone();
        for cookie in self.response_cookies.values() {
            next.request_cookies
                .insert(cookie.name.clone(), cookie.value.clone());
        }
        next
    }
}

impl CookieTransport for CookieExchange {
    fn request_cookie(&self, name: &str) -> Option<&str> {
        self.request_cookies.get(name).map(String::as_str)
    }

    fn response_cookie(&self, name: &str) -> Option<&ResponseCookie> {
        self.response_cookies.get(name)
    }

    fn set_response_cookie(&mut self, cookie: ResponseCookie) {
        self.response_cookies.insert(cookie.name.clone(), cookie);
    }

    fn application_path(&self) -> &str {
        &self.application_path
    }
}
