//! TCP + TLS connector.
//!
//! Produces a [`MaybeTlsStream`] that is either a plain TCP stream or a
//! rustls-wrapped one, with the negotiated ALPN protocol and TLS metadata
//! exposed for the dispatcher and the verbose trace.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::options::TlsOptions;
use crate::timing::TimingCapture;
use crate::version::Protocol;

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    H2,
    Http1,
    /// No ALPN negotiated (or a plain TCP stream, which has none).
    None,
}

/// TLS facts for the verbose trace.
#[derive(Debug, Clone)]
pub struct TlsDetails {
    pub authorized: bool,
    pub cipher: Option<String>,
    pub protocol: Option<String>,
}

/// Stream that is either cleartext TCP or TLS.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    /// ALPN result of the handshake; `None` for cleartext.
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self {
            Self::Plain(_) => AlpnProtocol::None,
            Self::Tls(stream) => match stream.get_ref().1.alpn_protocol() {
                Some(b"h2") => AlpnProtocol::H2,
                Some(b"http/1.1") => AlpnProtocol::Http1,
                _ => AlpnProtocol::None,
            },
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn tls_details(&self, authorized: bool) -> Option<TlsDetails> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(stream) => {
                let conn = stream.get_ref().1;
                Some(TlsDetails {
                    authorized,
                    cipher: conn
                        .negotiated_cipher_suite()
                        .map(|s| format!("{:?}", s.suite())),
                    protocol: conn.protocol_version().map(|v| format!("{v:?}")),
                })
            }
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Result of establishing a transport.
pub struct Established {
    pub stream: MaybeTlsStream,
    /// The protocol to speak, after ALPN (TLS) or by prior decision.
    pub protocol: Protocol,
    /// Addresses the hostname resolved to, for the trace.
    pub addresses: Vec<String>,
}

/// Establishes transport connections per the request's TLS options.
#[derive(Debug, Clone)]
pub struct Connector {
    tls: TlsOptions,
}

impl Connector {
    pub fn new(tls: TlsOptions) -> Self {
        Self { tls }
    }

    /// Connect to `host:port`, optionally wrapping TLS with the given ALPN
    /// offer, and record timing milestones along the way.
    ///
    /// `fixed` is the pre-decided protocol for cleartext or forced
    /// preferences; with TLS + multiple ALPN offers the handshake decides.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
        alpn: Vec<Vec<u8>>,
        fixed: Option<Protocol>,
        capture: &mut TimingCapture,
    ) -> Result<Established> {
        capture.mark_socket();

        let addr = format!("{host}:{port}");
        let resolved: Vec<std::net::SocketAddr> = lookup_host(&addr)
            .await
            .map_err(|e| Error::connection(format!("DNS resolution failed for {addr}: {e}")))?
            .collect();
        capture.mark_lookup();
        let first = resolved
            .first()
            .copied()
            .ok_or_else(|| Error::connection(format!("no addresses found for {addr}")))?;
        let addresses: Vec<String> = resolved.iter().map(|a| a.ip().to_string()).collect();

        let tcp = TcpStream::connect(first)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {addr}: {e}")))?;
        let _ = tcp.set_nodelay(true);
        capture.mark_connect();

        if !use_tls {
            let protocol = fixed.unwrap_or(Protocol::H1);
            return Ok(Established {
                stream: MaybeTlsStream::Plain(tcp),
                protocol,
                addresses,
            });
        }

        let config = self.client_config(alpn)?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::tls(format!("invalid server name {host}: {e}")))?;
        let tls_stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake failed: {e}")))?;
        capture.mark_secure_connect();

        let stream = MaybeTlsStream::Tls(Box::new(tls_stream));
        let protocol = match stream.alpn_protocol() {
            AlpnProtocol::H2 => Protocol::H2,
            AlpnProtocol::Http1 => Protocol::H1,
            // No ALPN from the peer: honor a forced preference, else fall
            // back to HTTP/1.1.
            AlpnProtocol::None => fixed.unwrap_or(Protocol::H1),
        };
        Ok(Established {
            stream,
            protocol,
            addresses,
        })
    }

    fn client_config(&self, alpn: Vec<Vec<u8>>) -> Result<ClientConfig> {
        let builder = ClientConfig::builder();

        let builder = if self.tls.reject_unauthorized {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            for pem in &self.tls.ca {
                for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                    let cert =
                        cert.map_err(|e| Error::tls(format!("invalid CA certificate: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| Error::tls(format!("rejected CA certificate: {e}")))?;
                }
            }
            builder.with_root_certificates(roots)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new()))
        };

        let mut config = match (&self.tls.cert, &self.tls.key) {
            (Some(cert_pem), Some(key_pem)) => {
                let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::tls(format!("invalid client certificate: {e}")))?;
                let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                    .map_err(|e| Error::tls(format!("invalid client key: {e}")))?
                    .ok_or_else(|| Error::tls("no private key found in client key PEM"))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| Error::tls(format!("client auth setup failed: {e}")))?
            }
            _ => builder.with_no_client_auth(),
        };

        config.alpn_protocols = alpn;
        Ok(config)
    }
}

mod danger {
    //! Certificate verifier used when `reject_unauthorized` is off: accepts
    //! any server certificate while still checking signatures over the
    //! handshake transcript.

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerification {
        provider: CryptoProvider,
    }

    impl NoVerification {
        pub fn new() -> Self {
            Self {
                provider: rustls::crypto::aws_lc_rs::default_provider(),
            }
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
