//! Request configuration.
//!
//! A [`Request`] is immutable once a hop begins; redirects derive a fresh one
//! (see `redirect.rs`). Timeout semantics follow the split the client exposes
//! everywhere: `connect` covers transport establishment, `socket` is a
//! no-data window that resets on each received chunk, `total` is an absolute
//! deadline for the whole chain.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::cookie::CookieJar;
use crate::decode::TextEncoding;
use crate::error::Result;
use crate::pool::Pool;
use crate::version::HttpVersion;

/// Minimum effective timeout. Zero or sub-millisecond values clamp here
/// instead of erroring or firing immediately.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Timeout configuration for a request.
///
/// All timeouts are optional; `None` disables that phase's timer. The setters
/// clamp values below [`MIN_TIMEOUT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    /// Deadline for establishing the transport (DNS + TCP + TLS). Does not
    /// reset.
    pub connect: Option<Duration>,
    /// Maximum time between received bytes. Resets on each chunk.
    pub socket: Option<Duration>,
    /// Absolute deadline for the entire request, spanning every redirect hop.
    pub total: Option<Duration>,
}

impl Timeouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout.max(MIN_TIMEOUT));
        self
    }

    pub fn socket(mut self, timeout: Duration) -> Self {
        self.socket = Some(timeout.max(MIN_TIMEOUT));
        self
    }

    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout.max(MIN_TIMEOUT));
        self
    }
}

/// TLS configuration, consumed as opaque PEM/DER byte blobs.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Additional trust anchors (PEM), appended to the built-in roots.
    pub ca: Vec<Vec<u8>>,
    /// Client certificate chain (PEM).
    pub cert: Option<Vec<u8>>,
    /// Client private key (PEM).
    pub key: Option<Vec<u8>>,
    /// Verify the server certificate. Disabling trades security for reach;
    /// mirrors `strictSSL: false`.
    pub reject_unauthorized: bool,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self {
            reject_unauthorized: true,
            ..Self::default()
        }
    }

    /// Stable fingerprint of the TLS identity, part of the pool key: two
    /// requests may share a connection only when their TLS setup is
    /// identical.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for ca in &self.ca {
            ca.hash(&mut hasher);
        }
        self.cert.hash(&mut hasher);
        self.key.hash(&mut hasher);
        self.reject_unauthorized.hash(&mut hasher);
        hasher.finish()
    }
}

/// One HTTP request specification.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// Headers in insertion order; lookup is case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub protocol_version: HttpVersion,
    pub tls: TlsOptions,
    pub timeouts: Timeouts,
    /// Socket-level idle-close for pooled connections (agent options
    /// timeout). `None` uses the pool default.
    pub pool_idle_timeout: Option<Duration>,
    /// Idle expiry of the agent identity itself; when it lapses, the next
    /// request gets a new connection identity even if a pooled socket is
    /// still alive. Distinct from `pool_idle_timeout` on purpose.
    pub agent_idle_timeout: Option<Duration>,
    /// Limit on the decoded response size in bytes.
    pub max_response_size: Option<u64>,
    pub jar: Option<CookieJar>,
    /// Transparently decode `Content-Encoding: gzip`.
    pub gzip: bool,
    /// Transparently decode `Content-Encoding: br`.
    pub brotli: bool,
    pub encoding: TextEncoding,
    /// Follow 3xx responses automatically.
    pub follow_redirects: bool,
    /// Maximum hops when following redirects.
    pub max_redirects: u32,
    /// Explicit connection pool; `None` uses the process-wide default.
    pub pool: Option<Pool>,
    /// Capture the full per-hop debug trace (implies timing).
    pub verbose: bool,
    /// Capture timing without the full trace.
    pub time: bool,
}

impl Request {
    pub fn new(method: Method, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            protocol_version: HttpVersion::default(),
            tls: TlsOptions::new(),
            timeouts: Timeouts::default(),
            pool_idle_timeout: None,
            agent_idle_timeout: None,
            max_response_size: None,
            jar: None,
            gzip: false,
            brotli: false,
            encoding: TextEncoding::default(),
            follow_redirects: true,
            max_redirects: crate::redirect::MAX_REDIRECTS,
            pool: None,
            verbose: false,
            time: false,
        })
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl AsRef<str>) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether transparent decoding is active: the caller opted in and did
    /// not take over `Accept-Encoding` themselves.
    pub fn transparent_decoding(&self) -> bool {
        (self.gzip || self.brotli) && self.header("accept-encoding").is_none()
    }

    /// The `Accept-Encoding` value to offer when transparent decoding is on.
    pub fn accept_encoding_offer(&self) -> Option<String> {
        if !self.transparent_decoding() {
            return None;
        }
        let mut offers = Vec::new();
        if self.gzip {
            offers.push("gzip");
        }
        if self.brotli {
            offers.push("br");
        }
        Some(offers.join(", "))
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_setters_clamp_to_minimum() {
        let t = Timeouts::new()
            .connect(Duration::ZERO)
            .socket(Duration::from_micros(400))
            .total(Duration::from_millis(250));
        assert_eq!(t.connect, Some(MIN_TIMEOUT));
        assert_eq!(t.socket, Some(MIN_TIMEOUT));
        assert_eq!(t.total, Some(Duration::from_millis(250)));
    }

    #[test]
    fn transparent_decoding_requires_opt_in_and_no_explicit_header() {
        let mut req = Request::get("http://example.com/").unwrap();
        assert!(!req.transparent_decoding());

        req.gzip = true;
        assert!(req.transparent_decoding());
        assert_eq!(req.accept_encoding_offer().unwrap(), "gzip");

        req.brotli = true;
        assert_eq!(req.accept_encoding_offer().unwrap(), "gzip, br");

        req.headers
            .push(("Accept-Encoding".to_string(), "identity".to_string()));
        assert!(!req.transparent_decoding());
        assert!(req.accept_encoding_offer().is_none());
    }

    #[test]
    fn default_ports() {
        let req = Request::get("http://example.com/").unwrap();
        assert_eq!(req.port(), 80);
        let req = Request::get("https://example.com/").unwrap();
        assert_eq!(req.port(), 443);
        let req = Request::get("http://example.com:8080/").unwrap();
        assert_eq!(req.port(), 8080);
    }

    #[test]
    fn tls_fingerprint_distinguishes_identities() {
        let a = TlsOptions::new();
        let mut b = TlsOptions::new();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.reject_unauthorized = false;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
