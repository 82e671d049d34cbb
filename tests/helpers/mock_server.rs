//! Programmable HTTP/1.1 mock server over raw TCP with keep-alive support.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// A canned response for one route.
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Delay before writing the response, for timeout tests.
    pub delay: Option<Duration>,
    /// Close the connection after responding.
    pub close: bool,
}

impl ResponseSpec {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            delay: None,
            close: false,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }
}

/// What the server saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    routes: Mutex<HashMap<String, ResponseSpec>>,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
}

impl ServerState {
    pub fn route(&self, path: &str, spec: ResponseSpec) {
        self.routes.lock().unwrap().insert(path.to_string(), spec);
    }

    pub fn lookup(&self, path: &str) -> ResponseSpec {
        self.routes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| ResponseSpec::new(404).body(&b"not found"[..]))
    }

    pub fn record(&self, request: RecordedRequest) {
        self.requests.lock().unwrap().push(request);
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of TCP connections accepted.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// HTTP/1.1 mock server bound to a random localhost port.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    state: Arc<ServerState>,
}

impl MockHttpServer {
    pub async fn new() -> std::io::Result<Self> {
        super::init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            state: Arc::new(ServerState::default()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn route(&self, path: &str, spec: ResponseSpec) {
        self.state.route(path, spec);
    }

    /// Accept connections in a background task until aborted.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let listener = self.listener;
        let state = self.state;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        state.connection_opened();
                        tokio::spawn(serve_h1(stream, Arc::clone(&state)));
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

/// Serve HTTP/1.1 requests on one connection until it closes.
///
/// Generic over the stream so the TLS server can reuse it.
pub async fn serve_h1<S>(mut stream: S, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let head_end = loop {
            if let Some(pos) = find_header_end(&pending) {
                break pos;
            }
            let mut buf = [0u8; 8192];
            let n = match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                _ => return,
            };
            if n == 0 {
                return;
            }
            pending.extend_from_slice(&buf[..n]);
        };

        let head = String::from_utf8_lossy(&pending[..head_end]).into_owned();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| {
                let (k, v) = line.split_once(':')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        let content_length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);
        let client_close = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("connection"))
            .is_some_and(|(_, v)| v.eq_ignore_ascii_case("close"));

        // Consume the body before responding.
        let body_start = head_end + 4;
        while pending.len() < body_start + content_length {
            let mut buf = [0u8; 8192];
            let n = match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                _ => return,
            };
            if n == 0 {
                return;
            }
            pending.extend_from_slice(&buf[..n]);
        }
        pending.drain(..body_start + content_length);

        let head_only = method == "HEAD";
        state.record(RecordedRequest {
            method,
            path: path.clone(),
            headers,
        });

        let spec = state.lookup(path.split('?').next().unwrap_or(&path));
        if let Some(delay) = spec.delay {
            tokio::time::sleep(delay).await;
        }

        let bodyless_status = matches!(spec.status, 204 | 304);
        let mut response = format!("HTTP/1.1 {} {}\r\n", spec.status, reason(spec.status));
        for (k, v) in &spec.headers {
            response.push_str(&format!("{k}: {v}\r\n"));
        }
        if !bodyless_status {
            response.push_str(&format!("Content-Length: {}\r\n", spec.body.len()));
        }
        if spec.close || client_close {
            response.push_str("Connection: close\r\n");
        }
        response.push_str("\r\n");

        let mut wire = response.into_bytes();
        // HEAD gets the Content-Length of the would-be body, but no body.
        if !head_only && !bodyless_status {
            wire.extend_from_slice(&spec.body);
        }
        if stream.write_all(&wire).await.is_err() || stream.flush().await.is_err() {
            return;
        }

        if spec.close || client_close {
            return;
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
