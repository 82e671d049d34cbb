//! HTTP/2 mock servers built on the `h2` crate: a routes-based responder
//! (prior knowledge over cleartext, or behind TLS) and a reset server that
//! answers every stream with RST_STREAM carrying a chosen reason code.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use super::mock_server::{RecordedRequest, ServerState};

/// HTTP/2 mock server speaking prior knowledge over cleartext TCP.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
    state: Arc<ServerState>,
}

impl MockH2Server {
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

    pub fn route(&self, path: &str, spec: super::mock_server::ResponseSpec) {
        self.state.route(path, spec);
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let listener = self.listener;
        let state = self.state;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                state.connection_opened();
                tokio::spawn(serve_h2(stream, Arc::clone(&state)));
            }
        })
    }
}

/// Serve routed HTTP/2 responses on one connection.
///
/// Generic over the stream so the TLS server can reuse it.
pub async fn serve_h2<S>(stream: S, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = match h2::server::handshake(stream).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("h2 handshake failed: {}", e);
            return;
        }
    };

    while let Some(accepted) = conn.accept().await {
        let (request, mut respond) = match accepted {
            Ok(pair) => pair,
            Err(_) => return,
        };
        state.record(RecordedRequest {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        });

        let spec = state.lookup(request.uri().path());
        if let Some(delay) = spec.delay {
            tokio::time::sleep(delay).await;
        }

        let mut builder = http::Response::builder().status(spec.status);
        for (k, v) in &spec.headers {
            builder = builder.header(k, v);
        }
        let response = builder.body(()).unwrap();

        let body = Bytes::from(spec.body);
        let end_of_stream = body.is_empty();
        match respond.send_response(response, end_of_stream) {
            Ok(mut send) if !end_of_stream => {
                let _ = send.send_data(body, true);
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// HTTP/2 server that resets every stream with a fixed reason code.
pub struct H2ResetServer {
    listener: TcpListener,
    port: u16,
    reason: u32,
}

impl H2ResetServer {
    pub async fn new(reason: u32) -> std::io::Result<Self> {
        super::init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            reason,
        })
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let listener = self.listener;
        let reason = self.reason;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut conn = match h2::server::handshake(stream).await {
                        Ok(conn) => conn,
                        Err(_) => return,
                    };
                    while let Some(Ok((_request, mut respond))) = conn.accept().await {
                        respond.send_reset(h2::Reason::from(reason));
                    }
                });
            }
        })
    }
}
