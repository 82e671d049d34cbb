//! The client: per-hop execution, redirect chains, and the public builders.
//!
//! One request is a chain of hops. Each hop selects its transport
//! independently (so redirects may cross from HTTP/2 to HTTP/1.1 and back),
//! borrows or establishes a connection through the pool, streams the response
//! body through the decoding pipeline, and returns the connection when it is
//! reusable. The chain layer follows redirects, rolls timing up across hops,
//! and accumulates the verbose trace.

use bytes::Bytes;
use http::Method;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::cookie::CookieJar;
use crate::decode::{bodyless_status, encode_text, ContentEncoding, DecodePipeline, TextEncoding};
use crate::dispatch::{self, Negotiation};
use crate::error::{Error, Result};
use crate::options::{Request, Timeouts, TlsOptions};
use crate::pool::{Pool, PoolKey};
use crate::redirect;
use crate::timing::{ChainTiming, TimingCapture, TimingPhases, TimingRecord};
use crate::trace::{
    HopTrace, RequestTrace, ResponseTrace, SessionData, SessionTrace, TlsTrace, TraceHeader,
};
use crate::transport::{h1, h2, Connector, H1Connection, H2Connection};
use crate::version::{HttpVersion, Protocol};

/// HTTP client. Cheap to clone; clones share the pool and jar.
#[derive(Debug, Clone, Default)]
pub struct Client {
    defaults: Defaults,
}

#[derive(Debug, Clone, Default)]
struct Defaults {
    protocol_version: HttpVersion,
    tls: Option<TlsOptions>,
    timeouts: Timeouts,
    jar: Option<CookieJar>,
    pool: Option<Pool>,
    gzip: bool,
    brotli: bool,
    verbose: bool,
    time: bool,
}

/// Configures a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    defaults: Defaults,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol_version(mut self, version: HttpVersion) -> Self {
        self.defaults.protocol_version = version;
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.defaults.tls = Some(tls);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.defaults.timeouts = timeouts;
        self
    }

    /// Attach a cookie jar shared by every request from this client.
    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.defaults.jar = Some(jar);
        self
    }

    /// Use a dedicated pool instead of the process-wide one.
    pub fn pool(mut self, pool: Pool) -> Self {
        self.defaults.pool = Some(pool);
        self
    }

    pub fn gzip(mut self, on: bool) -> Self {
        self.defaults.gzip = on;
        self
    }

    pub fn brotli(mut self, on: bool) -> Self {
        self.defaults.brotli = on;
        self
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.defaults.verbose = on;
        self
    }

    pub fn time(mut self, on: bool) -> Self {
        self.defaults.time = on;
        self
    }

    pub fn build(self) -> Client {
        Client {
            defaults: self.defaults,
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn request(&self, method: Method, url: impl AsRef<str>) -> RequestBuilder {
        let request = Request::new(method, url).map(|mut r| {
            r.protocol_version = self.defaults.protocol_version;
            if let Some(tls) = &self.defaults.tls {
                r.tls = tls.clone();
            }
            r.timeouts = self.defaults.timeouts;
            r.jar = self.defaults.jar.clone();
            r.pool = self.defaults.pool.clone();
            r.gzip = self.defaults.gzip;
            r.brotli = self.defaults.brotli;
            r.verbose = self.defaults.verbose;
            r.time = self.defaults.time;
            r
        });
        RequestBuilder {
            client: self.clone(),
            request,
        }
    }

    /// Execute a request, following redirects, under the total deadline.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        match request.timeouts.total {
            Some(deadline) => tokio::time::timeout(deadline, self.run_chain(request))
                .await
                .map_err(|_| Error::TotalTimeout(deadline))?,
            None => self.run_chain(request).await,
        }
    }

    async fn run_chain(&self, mut request: Request) -> Result<Response> {
        let mut chain = ChainTiming::start();
        let mut trace: Vec<HopTrace> = Vec::new();
        let mut hops = 0u32;

        loop {
            let hop = run_hop(&request).await?;
            chain.record_response_start(hop.response_wall);
            if request.verbose {
                trace.push(hop.trace.clone());
            }

            if let Some(location) = &hop.redirect {
                hops += 1;
                if hops > request.max_redirects {
                    return Err(Error::RedirectLimit { count: hops });
                }
                tracing::debug!(
                    "redirect {} {} -> {}",
                    hop.status,
                    request.url,
                    location
                );
                request = redirect::derive_for_redirect(&request, hop.status, location)?;
                continue;
            }

            let capture_timing = request.time || request.verbose;
            return Ok(Response {
                status: http::StatusCode::from_u16(hop.status)
                    .map_err(|e| Error::MalformedResponse(e.to_string()))?,
                headers: hop.headers,
                http_version: hop.protocol,
                url: request.url.clone(),
                body: hop.body,
                encoding: request.encoding,
                elapsed_time: capture_timing.then(|| chain.elapsed_ms()),
                response_start_time: if capture_timing {
                    chain.response_start()
                } else {
                    None
                },
                timing_start: capture_timing.then(|| chain.start_wall()),
                timings: capture_timing.then_some(hop.timings),
                timing_phases: capture_timing.then(|| hop.timings.phases()),
                trace,
            });
        }
    }
}

/// Builds and sends one request.
pub struct RequestBuilder {
    client: Client,
    request: Result<Request>,
}

impl RequestBuilder {
    fn map(mut self, f: impl FnOnce(&mut Request)) -> Self {
        if let Ok(request) = &mut self.request {
            f(request);
        }
        self
    }

    pub fn header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.map(|r| r.headers.push((key, value)))
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.map(|r| r.body = Some(body))
    }

    /// JSON body with `Content-Type: application/json`.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        let encoded = match serde_json::to_vec(value) {
            Ok(v) => v,
            Err(e) => {
                self.request = Err(e.into());
                return self;
            }
        };
        self.map(|r| {
            r.headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
            r.body = Some(Bytes::from(encoded));
        })
    }

    pub fn protocol_version(self, version: HttpVersion) -> Self {
        self.map(|r| r.protocol_version = version)
    }

    pub fn tls(self, tls: TlsOptions) -> Self {
        self.map(|r| r.tls = tls)
    }

    pub fn timeouts(self, timeouts: Timeouts) -> Self {
        self.map(|r| r.timeouts = timeouts)
    }

    pub fn cookie_jar(self, jar: CookieJar) -> Self {
        self.map(|r| r.jar = Some(jar))
    }

    pub fn pool(self, pool: Pool) -> Self {
        self.map(|r| r.pool = Some(pool))
    }

    pub fn pool_idle_timeout(self, timeout: std::time::Duration) -> Self {
        self.map(|r| r.pool_idle_timeout = Some(timeout))
    }

    pub fn agent_idle_timeout(self, timeout: std::time::Duration) -> Self {
        self.map(|r| r.agent_idle_timeout = Some(timeout))
    }

    pub fn max_response_size(self, limit: u64) -> Self {
        self.map(|r| r.max_response_size = Some(limit))
    }

    pub fn gzip(self, on: bool) -> Self {
        self.map(|r| r.gzip = on)
    }

    pub fn brotli(self, on: bool) -> Self {
        self.map(|r| r.brotli = on)
    }

    pub fn encoding(self, encoding: TextEncoding) -> Self {
        self.map(|r| r.encoding = encoding)
    }

    pub fn follow_redirects(self, on: bool) -> Self {
        self.map(|r| r.follow_redirects = on)
    }

    pub fn max_redirects(self, limit: u32) -> Self {
        self.map(|r| r.max_redirects = limit)
    }

    pub fn verbose(self, on: bool) -> Self {
        self.map(|r| r.verbose = on)
    }

    pub fn time(self, on: bool) -> Self {
        self.map(|r| r.time = on)
    }

    pub fn build(self) -> Result<Request> {
        self.request
    }

    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        let request = self.request?;
        client.execute(request).await
    }
}

/// A completed response.
#[derive(Debug)]
pub struct Response {
    pub status: http::StatusCode,
    /// Response headers in received order.
    pub headers: Vec<(String, String)>,
    /// The protocol that served the final hop.
    pub http_version: Protocol,
    /// Final URL after redirects.
    pub url: Url,
    pub body: Bytes,
    encoding: TextEncoding,
    /// Milliseconds from chain start to body end; set when timing was on.
    pub elapsed_time: Option<f64>,
    /// Wall-clock ms of the final hop's first response byte.
    pub response_start_time: Option<f64>,
    /// Wall-clock ms of the chain start.
    pub timing_start: Option<f64>,
    /// Milestones of the final hop.
    pub timings: Option<TimingRecord>,
    pub timing_phases: Option<TimingPhases>,
    /// Per-hop trace; populated in verbose mode, including redirect hops.
    pub trace: Vec<HopTrace>,
}

impl Response {
    /// Case-insensitive header lookup; first value wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body rendered per the request's text encoding; `None` for binary.
    pub fn text(&self) -> Option<String> {
        encode_text(&self.body, self.encoding)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

enum HopConn {
    H1 {
        conn: H1Connection,
        id: u64,
        key: PoolKey,
    },
    H2 {
        conn: H2Connection,
        id: u64,
        key: PoolKey,
    },
}

impl HopConn {
    fn protocol(&self) -> Protocol {
        match self {
            Self::H1 { .. } => Protocol::H1,
            Self::H2 { .. } => Protocol::H2,
        }
    }

    fn id(&self) -> u64 {
        match self {
            Self::H1 { id, .. } | Self::H2 { id, .. } => *id,
        }
    }

    fn addresses(&self) -> Vec<String> {
        match self {
            Self::H1 { conn, .. } => conn.addresses().to_vec(),
            Self::H2 { conn, .. } => conn.addresses().to_vec(),
        }
    }

    fn tls_trace(&self, reused: bool) -> Option<TlsTrace> {
        let details = match self {
            Self::H1 { conn, .. } => conn.tls_details(),
            Self::H2 { conn, .. } => conn.tls_details(),
        }?;
        Some(TlsTrace {
            reused,
            authorized: details.authorized,
            cipher: details.cipher.clone(),
            protocol: details.protocol.clone(),
        })
    }
}

struct HopResult {
    status: u16,
    headers: Vec<(String, String)>,
    protocol: Protocol,
    body: Bytes,
    /// `Location` of a redirect this chain will follow.
    redirect: Option<String>,
    trace: HopTrace,
    timings: TimingRecord,
    response_wall: Option<f64>,
}

/// Headers actually sent on the wire for this hop, in order.
fn assemble_headers(request: &Request) -> Vec<(String, String)> {
    let mut headers = request.headers.clone();
    if let Some(offer) = request.accept_encoding_offer() {
        headers.push(("Accept-Encoding".to_string(), offer));
    }
    if let Some(jar) = &request.jar {
        if request.header("cookie").is_none() {
            let cookie = jar.cookie_string(request.url.as_str());
            if !cookie.is_empty() {
                headers.push(("Cookie".to_string(), cookie));
            }
        }
    }
    headers
}

/// Borrow a pooled connection or establish a new one for this hop.
async fn obtain_connection(
    request: &Request,
    pool: &Pool,
    generation: u64,
    negotiation: &Negotiation,
    capture: &mut TimingCapture,
) -> Result<(HopConn, bool)> {
    let is_https = request.is_https();
    let host = request.host().to_string();
    let port = request.port();
    let tls_id = request.tls.fingerprint();
    let make_key = |protocol: Protocol| PoolKey {
        host: host.clone(),
        port,
        is_https,
        protocol,
        tls_id,
    };
    let fixed = match negotiation {
        Negotiation::Fixed(p) => Some(*p),
        Negotiation::Alpn(_) => None,
    };

    if fixed != Some(Protocol::H1) {
        let key = make_key(Protocol::H2);
        if let Some((conn, id)) = pool.lookup_h2(&key, generation) {
            capture.mark_reused(is_https);
            return Ok((HopConn::H2 { conn, id, key }, true));
        }
    }
    if fixed != Some(Protocol::H2) {
        let key = make_key(Protocol::H1);
        if let Some((conn, id)) = pool.checkout_h1(&key, generation) {
            capture.mark_reused(is_https);
            return Ok((HopConn::H1 { conn, id, key }, true));
        }
    }

    let connector = Connector::new(request.tls.clone());
    let alpn = if is_https {
        negotiation.alpn_protocols()
    } else {
        Vec::new()
    };
    let establish = async {
        let established = connector
            .connect(&host, port, is_https, alpn, fixed, capture)
            .await?;
        let authorized = established.stream.is_tls() && request.tls.reject_unauthorized;
        let protocol = established.protocol;
        let addresses = established.addresses;
        match protocol {
            Protocol::H1 => {
                let conn = H1Connection::handshake(established.stream, authorized, addresses)
                    .await?;
                let id = pool.next_id();
                Ok::<_, Error>(HopConn::H1 {
                    conn,
                    id,
                    key: make_key(Protocol::H1),
                })
            }
            Protocol::H2 => {
                let conn = H2Connection::handshake(established.stream, authorized, addresses)
                    .await?;
                let id = pool.next_id();
                let key = make_key(Protocol::H2);
                pool.register_h2(
                    key.clone(),
                    conn.clone(),
                    id,
                    generation,
                    request.pool_idle_timeout,
                );
                Ok(HopConn::H2 { conn, id, key })
            }
        }
    };
    let conn = match request.timeouts.connect {
        Some(deadline) => tokio::time::timeout(deadline, establish)
            .await
            .map_err(|_| Error::ConnectTimeout(deadline))??,
        None => establish.await?,
    };
    Ok((conn, false))
}

/// Read the whole response body through the decode pipeline.
///
/// `decode` selects transparent decompression; the size limit applies to the
/// decoded byte count either way. The socket timer restarts on every frame.
async fn read_body(
    mut incoming: hyper::body::Incoming,
    encoding: ContentEncoding,
    max_size: Option<u64>,
    socket_timeout: Option<std::time::Duration>,
) -> Result<Bytes> {
    let mut pipeline = DecodePipeline::new(encoding, max_size);
    let mut out = Vec::new();
    loop {
        let frame = match socket_timeout {
            Some(deadline) => tokio::time::timeout(deadline, incoming.frame())
                .await
                .map_err(|_| Error::SocketTimeout(deadline))?,
            None => incoming.frame().await,
        };
        let Some(frame) = frame else { break };
        let frame = frame.map_err(h2::classify_hyper_error)?;
        if let Some(data) = frame.data_ref() {
            out.extend_from_slice(&pipeline.push(data)?);
        }
    }
    out.extend_from_slice(&pipeline.finish()?);
    Ok(Bytes::from(out))
}

async fn run_hop(request: &Request) -> Result<HopResult> {
    let negotiation = dispatch::resolve(request.url.scheme(), request.protocol_version)?;
    let pool = request.pool.clone().unwrap_or_else(Pool::global);
    let tls_id = request.tls.fingerprint();
    let agent_probe = PoolKey {
        host: request.host().to_string(),
        port: request.port(),
        is_https: request.is_https(),
        protocol: Protocol::H1,
        tls_id,
    };
    let generation = pool.agent_generation(&agent_probe, request.agent_idle_timeout);

    let mut capture = TimingCapture::start();
    let (conn, reused) =
        obtain_connection(request, &pool, generation, &negotiation, &mut capture).await?;
    let protocol = conn.protocol();

    let sent_headers = assemble_headers(request);
    let session = SessionTrace {
        id: conn.id().to_string(),
        reused,
        data: SessionData {
            addresses: conn.addresses(),
            tls: conn.tls_trace(reused),
        },
    };

    // One send path per protocol so pool bookkeeping can differ on failure:
    // an HTTP/2 stream reset leaves the session usable, anything worse drops
    // it; a failed HTTP/1.1 connection is simply not returned.
    let hop = match conn {
        HopConn::H1 { mut conn, id, key } => {
            let result = send_and_read(&mut SendHandle::H1(&mut conn), request, &mut capture).await;
            match result {
                Ok(mut read) => {
                    if read.reusable && conn.ready().await.is_ok() {
                        pool.checkin_h1(key, conn, id, generation, request.pool_idle_timeout);
                    } else {
                        conn.close();
                    }
                    read.take()
                }
                Err(e) => {
                    conn.close();
                    return Err(e);
                }
            }
        }
        HopConn::H2 { mut conn, id, key } => {
            let result = send_and_read(&mut SendHandle::H2(&mut conn), request, &mut capture).await;
            match result {
                Ok(mut read) => {
                    pool.touch_h2(&key, id);
                    read.take()
                }
                Err(e) => {
                    if !matches!(e, Error::ConnectionReset { .. }) {
                        pool.remove_h2(&key, id);
                    }
                    return Err(e);
                }
            }
        }
    };
    let (status, headers, body, redirect) = hop;

    capture.mark_end();
    let response_wall = capture.response_wall();
    let timings = capture.finish();

    let trace = HopTrace {
        request: RequestTrace {
            method: request.method.to_string(),
            href: request.url.to_string(),
            headers: sent_headers
                .into_iter()
                .map(|(key, value)| TraceHeader { key, value })
                .collect(),
            proxy: None,
            http_version: protocol.as_str().to_string(),
        },
        session: Some(session),
        response: ResponseTrace {
            status_code: status,
            headers: headers
                .iter()
                .map(|(key, value)| TraceHeader {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            http_version: protocol.as_str().to_string(),
        },
        timing_start: Some(timings.start),
        timings: Some(timings),
    };

    Ok(HopResult {
        status,
        headers,
        protocol,
        body,
        redirect,
        trace,
        timings,
        response_wall,
    })
}

enum SendHandle<'a> {
    H1(&'a mut H1Connection),
    H2(&'a mut H2Connection),
}

impl SendHandle<'_> {
    async fn send(
        &mut self,
        request: hyper::Request<http_body_util::Full<Bytes>>,
    ) -> std::result::Result<hyper::Response<hyper::body::Incoming>, hyper::Error> {
        match self {
            Self::H1(conn) => conn.send(request).await,
            Self::H2(conn) => conn.send(request).await,
        }
    }

    fn build(
        &self,
        request: &Request,
        headers: &[(String, String)],
    ) -> Result<hyper::Request<http_body_util::Full<Bytes>>> {
        match self {
            Self::H1(_) => {
                h1::build_request(&request.method, &request.url, headers, request.body.clone())
            }
            Self::H2(_) => {
                h2::build_request(&request.method, &request.url, headers, request.body.clone())
            }
        }
    }
}

struct ReadOutcome {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    redirect: Option<String>,
    /// Body fully drained; the connection may go back to the pool.
    reusable: bool,
}

impl ReadOutcome {
    fn take(&mut self) -> (u16, Vec<(String, String)>, Bytes, Option<String>) {
        (
            self.status,
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body),
            self.redirect.take(),
        )
    }
}

async fn send_and_read(
    handle: &mut SendHandle<'_>,
    request: &Request,
    capture: &mut TimingCapture,
) -> Result<ReadOutcome> {
    let sent_headers = assemble_headers(request);
    let hyper_request = handle.build(request, &sent_headers)?;

    let send_fut = handle.send(hyper_request);
    let response = match request.timeouts.socket {
        Some(deadline) => tokio::time::timeout(deadline, send_fut)
            .await
            .map_err(|_| Error::SocketTimeout(deadline))?,
        None => send_fut.await,
    }
    .map_err(h2::classify_hyper_error)?;
    capture.mark_response();

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    if let Some(jar) = &request.jar {
        jar.store_response_cookies(
            response
                .headers()
                .get_all(http::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
            &request.url,
        );
    }

    let redirect = if request.follow_redirects && redirect::is_redirect(status) {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("location"))
            .map(|(_, v)| v.clone())
    } else {
        None
    };

    let skip_body = request.method == Method::HEAD || bodyless_status(status);
    let body = if skip_body {
        Bytes::new()
    } else if redirect.is_some() {
        // Redirect bodies are drained (to free the connection) but never
        // surfaced or decoded.
        read_body(
            response.into_body(),
            ContentEncoding::Identity,
            None,
            request.timeouts.socket,
        )
        .await?;
        Bytes::new()
    } else {
        let content_encoding = if request.transparent_decoding() {
            match ContentEncoding::from_header(
                headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-encoding"))
                    .map(|(_, v)| v.as_str()),
            ) {
                ContentEncoding::Gzip if request.gzip => ContentEncoding::Gzip,
                ContentEncoding::Brotli if request.brotli => ContentEncoding::Brotli,
                _ => ContentEncoding::Identity,
            }
        } else {
            ContentEncoding::Identity
        };
        read_body(
            response.into_body(),
            content_encoding,
            request.max_response_size,
            request.timeouts.socket,
        )
        .await?
    };

    Ok(ReadOutcome {
        status,
        headers,
        body,
        redirect,
        reusable: true,
    })
}
