//! TLS mock server: self-signed cert via rcgen, rustls acceptor with a
//! configurable ALPN offer, dispatching to the HTTP/1.1 or HTTP/2 serving
//! loop based on what the handshake negotiated.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use super::h2_server::serve_h2;
use super::mock_server::{ResponseSpec, ServerState};

/// Self-signed certificate for 127.0.0.1/localhost, as (cert PEM, key PEM).
pub fn generate_cert_pair() -> (Vec<u8>, Vec<u8>) {
    let names = vec!["127.0.0.1".to_string(), "localhost".to_string()];
    let cert = rcgen::generate_simple_self_signed(names).expect("failed to generate cert");
    (
        cert.cert.pem().into_bytes(),
        cert.signing_key.serialize_pem().into_bytes(),
    )
}

fn acceptor(cert_pem: &[u8], key_pem: &[u8], alpn: Vec<Vec<u8>>) -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .expect("failed to parse cert PEM");
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .expect("failed to parse key PEM")
        .expect("no key in PEM");
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("failed to build server config");
    config.alpn_protocols = alpn;
    TlsAcceptor::from(Arc::new(config))
}

/// HTTPS mock server. The ALPN offer controls which protocols it will
/// negotiate; requests are answered from the shared route table regardless of
/// protocol.
pub struct MockTlsServer {
    listener: TcpListener,
    port: u16,
    state: Arc<ServerState>,
    acceptor: TlsAcceptor,
    cert_pem: Vec<u8>,
}

impl MockTlsServer {
    /// Bind with the given ALPN offer, e.g. `&[b"h2", b"http/1.1"]` or just
    /// `&[b"http/1.1"]` for an HTTP/1.1-only endpoint.
    pub async fn new(alpn: &[&[u8]]) -> std::io::Result<Self> {
        super::init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (cert_pem, key_pem) = generate_cert_pair();
        let acceptor = acceptor(&cert_pem, &key_pem, alpn.iter().map(|p| p.to_vec()).collect());
        Ok(Self {
            listener,
            port,
            state: Arc::new(ServerState::default()),
            acceptor,
            cert_pem,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("https://localhost:{}", self.port)
    }

    /// The self-signed certificate, usable as a CA bundle on the client.
    pub fn ca(&self) -> Vec<u8> {
        self.cert_pem.clone()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn route(&self, path: &str, spec: ResponseSpec) {
        self.state.route(path, spec);
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let listener = self.listener;
        let state = self.state;
        let acceptor = self.acceptor;
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                state.connection_opened();
                let acceptor = acceptor.clone();
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let tls = match acceptor.accept(tcp).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::error!("TLS accept failed: {}", e);
                            return;
                        }
                    };
                    let negotiated_h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2");
                    if negotiated_h2 {
                        serve_h2(tls, state).await;
                    } else {
                        super::mock_server::serve_h1(tls, state).await;
                    }
                });
            }
        })
    }
}
