//! HTTP version configuration.

/// HTTP version preference for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// Force HTTP/1.1.
    Http1,
    /// Force HTTP/2 (ALPN `h2` over TLS, prior knowledge over cleartext).
    Http2,
    /// Negotiate via ALPN for `https`, HTTP/1.1 for `http`.
    #[default]
    Auto,
}

/// The protocol actually spoken on a connection, resolved per hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    H1,
    H2,
}

impl Protocol {
    /// Version string as reported on responses, e.g. `"1.1"` or `"2.0"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "1.1",
            Self::H2 => "2.0",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
