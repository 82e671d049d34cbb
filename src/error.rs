//! Error types for the courier crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HTTP operations.
///
/// Every variant carries a stable machine-readable code (see [`Error::code`])
/// alongside the human-readable message. Timeout variants distinguish whether
/// a connection had been established when the timer fired ([`Error::connected`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Connect timeout: TCP + TLS handshake did not complete in time.
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket timeout: the connection was established but no data arrived
    /// within the configured window.
    #[error("Socket timeout after {0:?} - no data received")]
    SocketTimeout(Duration),

    /// Total request deadline exceeded.
    #[error("Total request deadline exceeded after {0:?}")]
    TotalTimeout(Duration),

    /// HTTP/2 stream or connection reset, carrying the protocol reason code.
    #[error("{}", reset_message(*code))]
    ConnectionReset {
        /// RFC 9113 error code as sent on the wire.
        code: u32,
    },

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Decoded response exceeded the configured maximum size.
    #[error("Maximum response size reached")]
    MaxResponseSize {
        /// The configured limit in decoded bytes.
        limit: u64,
    },

    /// Content-decoding failure (malformed compressed stream, or the server
    /// claimed an encoding it did not apply).
    #[error("Decode error: {0}")]
    Decode(String),

    /// Redirect limit exceeded.
    #[error("Redirect limit exceeded ({count} redirects)")]
    RedirectLimit { count: u32 },

    /// Invalid redirect URL.
    #[error("Invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    /// Response violated the HTTP framing we rely on.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Cookie parsing error.
    #[error("Cookie parse error: {0}")]
    CookieParse(String),

    /// A Set-Cookie declared a domain that does not match the setting origin.
    #[error("Cookie domain {domain} does not match request host {host}")]
    CookieDomain { domain: String, host: String },

    /// Connection error (DNS, TCP, or the peer dropped us).
    #[error("Connection error: {0}")]
    Connection(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// RFC 9113 error code names, indexed by wire value 0x0..=0xd.
pub const RESET_CODE_NAMES: [&str; 14] = [
    "NGHTTP2_NO_ERROR",
    "NGHTTP2_PROTOCOL_ERROR",
    "NGHTTP2_INTERNAL_ERROR",
    "NGHTTP2_FLOW_CONTROL_ERROR",
    "NGHTTP2_SETTINGS_TIMEOUT",
    "NGHTTP2_STREAM_CLOSED",
    "NGHTTP2_FRAME_SIZE_ERROR",
    "NGHTTP2_REFUSED_STREAM",
    "NGHTTP2_CANCEL",
    "NGHTTP2_COMPRESSION_ERROR",
    "NGHTTP2_CONNECT_ERROR",
    "NGHTTP2_ENHANCE_YOUR_CALM",
    "NGHTTP2_INADEQUATE_SECURITY",
    "NGHTTP2_HTTP_1_1_REQUIRED",
];

/// Human-readable message for a stream reset code.
///
/// Cancellation (code 8) is deliberately distinguishable from every other
/// reset reason.
pub fn reset_message(code: u32) -> String {
    if code == 8 {
        return "HTTP/2 Stream closed with error code NGHTTP2_CANCEL".to_string();
    }
    match RESET_CODE_NAMES.get(code as usize) {
        Some(name) => format!("Stream closed with error code {name}"),
        None => format!("Stream closed with error code {code:#x}"),
    }
}

impl Error {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HttpProtocol(_) => "HTTP_PROTOCOL",
            Self::ConnectTimeout(_) => "CONNECT_TIMEOUT",
            Self::SocketTimeout(_) => "SOCKET_TIMEOUT",
            Self::TotalTimeout(_) => "TOTAL_TIMEOUT",
            Self::ConnectionReset { .. } => "CONNECTION_RESET",
            Self::Tls(_) => "TLS",
            Self::MaxResponseSize { .. } => "MAX_RESPONSE_SIZE",
            Self::Decode(_) => "DECODE",
            Self::RedirectLimit { .. } => "REDIRECT_LIMIT",
            Self::InvalidRedirectUrl(_) => "INVALID_REDIRECT_URL",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::CookieParse(_) => "COOKIE_PARSE",
            Self::CookieDomain { .. } => "COOKIE_DOMAIN",
            Self::Connection(_) => "CONNECTION",
            Self::UrlParse(_) => "URL_PARSE",
            Self::Json(_) => "JSON",
            Self::Io(_) => "IO",
        }
    }

    /// Whether a connection had been established when this error occurred.
    ///
    /// `false` for connect-phase failures, `true` for anything that can only
    /// happen after the transport was up.
    pub fn connected(&self) -> bool {
        !matches!(
            self,
            Self::ConnectTimeout(_) | Self::Connection(_) | Self::Tls(_) | Self::UrlParse(_)
        )
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}
