//! Request timing capture and rollup.
//!
//! Each hop records wall-clock millisecond offsets for the classic request
//! milestones (socket assignment, DNS, TCP connect, TLS handshake, first
//! response byte, body end). A redirect chain rolls these up so elapsed time
//! and response start are measured from the start of the chain, not reset per
//! hop.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Milestone offsets for one hop, in milliseconds relative to [`TimingRecord::start`].
///
/// Non-decreasing in declaration order; on a reused connection `socket`,
/// `lookup`, `connect` and `secure_connect` all coincide.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingRecord {
    /// Wall-clock start of the hop, ms since the Unix epoch.
    #[serde(skip)]
    pub start: f64,
    pub socket: f64,
    pub lookup: f64,
    pub connect: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_connect: Option<f64>,
    pub response: f64,
    pub end: f64,
}

/// Durations of each request phase, derived from a [`TimingRecord`].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingPhases {
    pub wait: f64,
    pub dns: f64,
    pub tcp: f64,
    pub first_byte: f64,
    pub download: f64,
    pub total: f64,
    pub secure_handshake: f64,
}

impl TimingRecord {
    /// Compute phase durations from the milestone offsets.
    pub fn phases(&self) -> TimingPhases {
        let handshake_end = self.secure_connect.unwrap_or(self.connect);
        TimingPhases {
            wait: self.socket,
            dns: self.lookup - self.socket,
            tcp: self.connect - self.lookup,
            secure_handshake: handshake_end - self.connect,
            first_byte: self.response - handshake_end,
            download: self.end - self.response,
            total: self.end,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn wall_now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Per-hop milestone recorder.
///
/// Marks are idempotent on omission: a milestone that never happens (e.g.
/// `secure_connect` on cleartext) is filled from its predecessor so the
/// record stays monotone.
#[derive(Debug)]
pub struct TimingCapture {
    start_wall: f64,
    anchor: Instant,
    socket: Option<f64>,
    lookup: Option<f64>,
    connect: Option<f64>,
    secure_connect: Option<f64>,
    tls: bool,
    response: Option<f64>,
    end: Option<f64>,
}

impl TimingCapture {
    pub fn start() -> Self {
        Self {
            start_wall: wall_now_ms(),
            anchor: Instant::now(),
            socket: None,
            lookup: None,
            connect: None,
            secure_connect: None,
            tls: false,
            response: None,
            end: None,
        }
    }

    fn offset(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64() * 1000.0
    }

    pub fn mark_socket(&mut self) {
        self.socket = Some(self.offset());
    }

    pub fn mark_lookup(&mut self) {
        self.lookup = Some(self.offset());
    }

    pub fn mark_connect(&mut self) {
        self.connect = Some(self.offset());
    }

    pub fn mark_secure_connect(&mut self) {
        self.tls = true;
        self.secure_connect = Some(self.offset());
    }

    /// A pooled connection was handed out: socket, lookup, connect and (for
    /// TLS) secure_connect all collapse to the checkout instant.
    pub fn mark_reused(&mut self, tls: bool) {
        let now = self.offset();
        self.socket = Some(now);
        self.lookup = Some(now);
        self.connect = Some(now);
        self.tls = tls;
        if tls {
            self.secure_connect = Some(now);
        }
    }

    pub fn mark_response(&mut self) {
        if self.response.is_none() {
            self.response = Some(self.offset());
        }
    }

    pub fn mark_end(&mut self) {
        self.end = Some(self.offset());
    }

    /// Wall-clock timestamp (ms since epoch) of the first response byte.
    pub fn response_wall(&self) -> Option<f64> {
        self.response.map(|r| self.start_wall + r)
    }

    pub fn finish(&self) -> TimingRecord {
        let socket = self.socket.unwrap_or(0.0);
        let lookup = self.lookup.unwrap_or(socket);
        let connect = self.connect.unwrap_or(lookup);
        let secure_connect = if self.tls {
            Some(self.secure_connect.unwrap_or(connect))
        } else {
            None
        };
        let floor = secure_connect.unwrap_or(connect);
        let response = self.response.unwrap_or(floor).max(floor);
        let end = self.end.unwrap_or(response).max(response);
        TimingRecord {
            start: self.start_wall,
            socket,
            lookup,
            connect,
            secure_connect,
            response,
            end,
        }
    }
}

/// Timing rollup across a redirect chain.
///
/// `elapsed` and `response_start` are measured from the chain start; per-hop
/// records are kept in the verbose trace.
#[derive(Debug)]
pub struct ChainTiming {
    start_wall: f64,
    anchor: Instant,
    response_start: Option<f64>,
}

impl ChainTiming {
    pub fn start() -> Self {
        Self {
            start_wall: wall_now_ms(),
            anchor: Instant::now(),
            response_start: None,
        }
    }

    /// Wall-clock start of the chain, ms since epoch.
    pub fn start_wall(&self) -> f64 {
        self.start_wall
    }

    /// Record the first-byte timestamp of the latest hop; the final hop's
    /// value is the one surfaced to the caller.
    pub fn record_response_start(&mut self, wall_ms: Option<f64>) {
        self.response_start = wall_ms;
    }

    /// Milliseconds from chain start until now.
    pub fn elapsed_ms(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64() * 1000.0
    }

    /// Wall-clock timestamp of the final hop's first response byte.
    pub fn response_start(&self) -> Option<f64> {
        self.response_start
    }
}
