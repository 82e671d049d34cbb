//! RFC 6265-adjacent cookie handling.
//!
//! Deliberately forgiving about malformed `Set-Cookie` text: a bare token
//! with no `=` is stored as a cookie with an empty key rather than rejected.
//! Cross-domain writes are the one hard failure: a `Domain` attribute that
//! does not domain-match the origin that set the cookie is refused outright.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use url::Url;

use crate::error::{Error, Result};

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name. Empty for malformed cookies stored from a bare token.
    pub key: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// True when no `Domain` attribute was present: the cookie only matches
    /// the exact host that set it.
    pub host_only: bool,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub creation: DateTime<Utc>,
}

impl Cookie {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            host_only: true,
            expires: None,
            max_age: None,
            creation: Utc::now(),
        }
    }

    /// Parse one `Set-Cookie` header value in the context of the request that
    /// carried it.
    ///
    /// A `Domain` attribute that is not a domain-match of the setting host is
    /// an error; the cookie must not be stored at all.
    pub fn parse(header: &str, request_url: &Url) -> Result<Self> {
        let request_host = request_url
            .host_str()
            .ok_or_else(|| Error::CookieParse("no host in URL".to_string()))?
            .to_lowercase();

        let mut parts = header.split(';').map(str::trim);
        let pair = parts
            .next()
            .ok_or_else(|| Error::CookieParse("empty cookie header".to_string()))?;

        // Bare tokens and pairs with an empty name become malformed cookies
        // with an empty key; this is intentional, not a parse failure.
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => (k.trim().to_string(), v.trim().to_string()),
            _ => (String::new(), pair.to_string()),
        };

        let mut cookie = Cookie::new(key, value, request_host.clone());

        for attr in parts {
            let attr_lower = attr.to_lowercase();
            if attr_lower == "secure" {
                cookie.secure = true;
            } else if attr_lower == "httponly" {
                cookie.http_only = true;
            } else if let Some((k, v)) = attr.split_once('=') {
                match k.trim().to_lowercase().as_str() {
                    "domain" => {
                        let declared = normalize_domain(v.trim());
                        if declared.is_empty() {
                            continue;
                        }
                        if !domain_match(&request_host, &declared) {
                            return Err(Error::CookieDomain {
                                domain: declared,
                                host: request_host,
                            });
                        }
                        cookie.domain = declared;
                        cookie.host_only = false;
                    }
                    "path" => {
                        let p = v.trim();
                        if p.starts_with('/') {
                            cookie.path = p.to_string();
                        }
                    }
                    "expires" => cookie.expires = parse_cookie_date(v.trim()),
                    "max-age" => cookie.max_age = v.trim().parse().ok(),
                    _ => {}
                }
            }
        }
        Ok(cookie)
    }

    /// Whether this cookie should be sent for `url`.
    pub fn matches_url(&self, url: &Url) -> bool {
        let request_host = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        if let Some(expires) = self.expires {
            if expires < Utc::now() {
                return false;
            }
        }
        if self.host_only {
            if request_host != self.domain {
                return false;
            }
        } else if !domain_match(&request_host, &self.domain) {
            return false;
        }
        self.path_matches(url.path())
    }

    /// RFC 6265 §5.1.4 path matching.
    pub fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        if request_path.starts_with(&self.path) {
            return self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/');
        }
        false
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// RFC 6265 §5.1.3: `host` domain-matches `domain` when equal or when
/// `host` ends with `.domain`.
fn domain_match(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_lowercase()
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    date_str
        .parse::<i64>()
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

/// Opaque cookie storage backend.
///
/// The jar treats the store as a dumb collection: all matching logic lives
/// in [`Cookie`] and [`CookieJar`], so any backing representation works.
pub trait CookieStore: Send + Sync + fmt::Debug {
    /// Insert or replace a cookie. Identity is (domain, path, key).
    fn put(&self, cookie: Cookie);
    /// Snapshot of every stored cookie.
    fn all(&self) -> Vec<Cookie>;
    fn clear(&self);
}

/// Default in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cookies: Mutex<HashMap<(String, String, String), Cookie>>,
}

impl CookieStore for MemoryStore {
    fn put(&self, cookie: Cookie) {
        let mut map = self.cookies.lock().expect("cookie store mutex poisoned");
        map.insert(
            (
                cookie.domain.clone(),
                cookie.path.clone(),
                cookie.key.clone(),
            ),
            cookie,
        );
    }

    fn all(&self) -> Vec<Cookie> {
        let map = self.cookies.lock().expect("cookie store mutex poisoned");
        map.values().cloned().collect()
    }

    fn clear(&self) {
        let mut map = self.cookies.lock().expect("cookie store mutex poisoned");
        map.clear();
    }
}

/// Cookie jar shared across the hops of a request and across requests.
///
/// Cloning the jar clones the handle, not the contents.
#[derive(Debug, Clone)]
pub struct CookieJar {
    store: Arc<dyn CookieStore>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
        }
    }

    /// Build a jar over a custom storage backend.
    pub fn with_store(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }

    /// Parse and store one `Set-Cookie` value received from `request_url`.
    ///
    /// Returns the stored cookie, or an error when the cookie is refused
    /// (cross-domain `Domain` attribute); refused cookies are never stored.
    pub fn set_cookie(&self, raw: &str, request_url: &str) -> Result<Cookie> {
        let url = Url::parse(request_url)?;
        let cookie = Cookie::parse(raw, &url)?;
        self.store.put(cookie.clone());
        Ok(cookie)
    }

    /// Store every `Set-Cookie` from a response, silently dropping refused
    /// ones.
    pub fn store_response_cookies<'a>(
        &self,
        set_cookie_values: impl Iterator<Item = &'a str>,
        request_url: &Url,
    ) {
        for raw in set_cookie_values {
            match Cookie::parse(raw, request_url) {
                Ok(cookie) => self.store.put(cookie),
                Err(err) => {
                    tracing::debug!("dropping cookie from {}: {}", request_url, err);
                }
            }
        }
    }

    /// All cookies that should be sent for `url`, most specific path first.
    pub fn cookies_for_url(&self, url: &str) -> Vec<Cookie> {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };
        let mut cookies: Vec<Cookie> = self
            .store
            .all()
            .into_iter()
            .filter(|c| c.matches_url(&parsed))
            .collect();
        cookies.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.creation.cmp(&b.creation))
        });
        cookies
    }

    /// `Cookie` header value for `url`; empty string when nothing matches.
    pub fn cookie_string(&self, url: &str) -> String {
        self.cookies_for_url(url)
            .iter()
            .map(Cookie::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn get(&self, domain: &str, key: &str) -> Option<Cookie> {
        let domain = normalize_domain(domain);
        self.store
            .all()
            .into_iter()
            .find(|c| c.domain == domain && c.key == key)
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_cookie_stores_empty_key() {
        let jar = CookieJar::new();
        let c = jar.set_cookie("foo", "http://example.com/").unwrap();
        assert_eq!(c.key, "");
        assert_eq!(c.value, "foo");
        assert_eq!(jar.cookie_string("http://example.com/"), "foo");
    }

    #[test]
    fn cross_domain_set_cookie_is_rejected() {
        let jar = CookieJar::new();
        let err = jar
            .set_cookie("a=b; Domain=foo.com", "http://example.com/")
            .unwrap_err();
        assert_eq!(err.code(), "COOKIE_DOMAIN");
        assert!(jar.is_empty());
        assert_eq!(jar.cookie_string("http://foo.com/"), "");
    }

    #[test]
    fn parent_domain_attribute_is_accepted() {
        let jar = CookieJar::new();
        let c = jar
            .set_cookie("a=b; Domain=example.com", "http://www.example.com/")
            .unwrap();
        assert!(!c.host_only);
        assert_eq!(jar.cookie_string("http://api.example.com/"), "a=b");
    }

    #[test]
    fn host_only_cookie_does_not_leak_to_subdomains() {
        let jar = CookieJar::new();
        jar.set_cookie("a=b", "http://example.com/").unwrap();
        assert_eq!(jar.cookie_string("http://example.com/"), "a=b");
        assert_eq!(jar.cookie_string("http://www.example.com/"), "");
    }

    #[test]
    fn path_prefix_matching() {
        let c = Cookie {
            path: "/foo".to_string(),
            ..Cookie::new("a", "b", "example.com")
        };
        assert!(c.path_matches("/foo"));
        assert!(c.path_matches("/foo/bar"));
        assert!(c.path_matches("/foo/"));
        assert!(!c.path_matches("/foobar"));
        assert!(!c.path_matches("/fo"));
    }

    #[test]
    fn secure_cookie_requires_https() {
        let jar = CookieJar::new();
        jar.set_cookie("sid=1; Secure", "https://example.com/")
            .unwrap();
        assert_eq!(jar.cookie_string("http://example.com/"), "");
        assert_eq!(jar.cookie_string("https://example.com/"), "sid=1");
    }

    #[test]
    fn expired_cookie_not_returned() {
        let jar = CookieJar::new();
        jar.set_cookie(
            "a=b; Expires=Wed, 01 Jan 2020 00:00:00 GMT",
            "http://example.com/",
        )
        .unwrap();
        assert_eq!(jar.cookie_string("http://example.com/"), "");
    }

    #[test]
    fn longer_paths_sort_first() {
        let jar = CookieJar::new();
        jar.set_cookie("sid=123; Path=/foo", "http://example.com/foo")
            .unwrap();
        jar.set_cookie("tok=456; Path=/", "http://example.com/foo")
            .unwrap();
        assert_eq!(jar.cookie_string("http://example.com/foo"), "sid=123; tok=456");
    }

    #[test]
    fn missing_lookup_is_empty_not_error() {
        let jar = CookieJar::new();
        assert!(jar.cookies_for_url("http://nothing.invalid/").is_empty());
        assert_eq!(jar.cookie_string("not a url"), "");
    }

    #[test]
    fn pluggable_store_round_trip() {
        #[derive(Debug, Default)]
        struct VecStore(Mutex<Vec<Cookie>>);
        impl CookieStore for VecStore {
            fn put(&self, cookie: Cookie) {
                let mut v = self.0.lock().unwrap();
                v.retain(|c| {
                    (c.domain.as_str(), c.path.as_str(), c.key.as_str())
                        != (cookie.domain.as_str(), cookie.path.as_str(), cookie.key.as_str())
                });
                v.push(cookie);
            }
            fn all(&self) -> Vec<Cookie> {
                self.0.lock().unwrap().clone()
            }
            fn clear(&self) {
                self.0.lock().unwrap().clear();
            }
        }

        let jar = CookieJar::with_store(Arc::new(VecStore::default()));
        jar.set_cookie("a=1", "http://example.com/").unwrap();
        jar.set_cookie("a=2", "http://example.com/").unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.cookie_string("http://example.com/"), "a=2");
    }

    #[test]
    fn cookie_date_formats() {
        let url = Url::parse("http://example.com").unwrap();
        let c = Cookie::parse("a=b; Expires=Sun, 06 Nov 1994 08:49:37 GMT", &url).unwrap();
        assert_eq!(c.expires.unwrap(), Utc.timestamp_opt(784111777, 0).unwrap());
        let c = Cookie::parse("a=b; Expires=Sunday, 06-Nov-94 08:49:37 GMT", &url).unwrap();
        assert_eq!(c.expires.unwrap(), Utc.timestamp_opt(784111777, 0).unwrap());
    }
}
