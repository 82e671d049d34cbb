//! Per-hop debug trace, populated in verbose mode.
//!
//! One [`HopTrace`] per request/response exchange in a redirect chain,
//! carrying the request and response summaries, the session (connection
//! identity, reuse flag, addresses, TLS details) and the hop's timing.

use serde::Serialize;

use crate::timing::TimingRecord;

/// Ordered header capture, preserving the order headers were sent/received.
#[derive(Debug, Clone, Serialize)]
pub struct TraceHeader {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrace {
    pub method: String,
    pub href: String,
    pub headers: Vec<TraceHeader>,
    /// Proxy in use; always `None` here (proxying is a calling-layer
    /// concern) but kept in the trace shape.
    pub proxy: Option<String>,
    pub http_version: String,
}

/// TLS details for the session that served a hop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsTrace {
    pub reused: bool,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Remote addresses the hop connected (or was already connected) to.
    pub addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsTrace>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTrace {
    /// Connection identity; changes iff a new underlying connection was made.
    pub id: String,
    /// Whether the hop reused a pooled connection.
    pub reused: bool,
    pub data: SessionData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTrace {
    pub status_code: u16,
    pub headers: Vec<TraceHeader>,
    pub http_version: String,
}

/// One hop of the redirect chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HopTrace {
    pub request: RequestTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionTrace>,
    pub response: ResponseTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<TimingRecord>,
}
