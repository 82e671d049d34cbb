//! HTTP/2 connection via hyper's client conn API.
//!
//! The send handle is clonable: one session multiplexes many concurrent
//! streams, so the pool hands out clones while other requests are in flight.
//! Stream resets are translated from the `h2` reason code buried in hyper's
//! error source chain into the stable messages in [`crate::error`].

use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::connector::{MaybeTlsStream, TlsDetails};

/// An established HTTP/2 session. Cloning shares the underlying connection.
#[derive(Debug, Clone)]
pub struct H2Connection {
    sender: http2::SendRequest<Full<Bytes>>,
    driver: Arc<JoinHandle<()>>,
    tls: Option<TlsDetails>,
    addresses: Vec<String>,
}

impl H2Connection {
    pub async fn handshake(
        stream: MaybeTlsStream,
        authorized: bool,
        addresses: Vec<String>,
    ) -> Result<Self> {
        let tls = stream.tls_details(authorized);
        let io = TokioIo::new(stream);
        let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 handshake failed: {e}")))?;
        let driver = Arc::new(tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("HTTP/2 connection ended: {e}");
            }
        }));
        Ok(Self {
            sender,
            driver,
            tls,
            addresses,
        })
    }

    pub fn tls_details(&self) -> Option<&TlsDetails> {
        self.tls.as_ref()
    }

    /// Remote addresses the session resolved to, kept for the trace.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.driver.is_finished()
    }

    pub async fn send(
        &mut self,
        request: hyper::Request<Full<Bytes>>,
    ) -> std::result::Result<hyper::Response<Incoming>, hyper::Error> {
        self.sender.send_request(request).await
    }

    pub fn close(&self) {
        self.driver.abort();
    }
}

/// Pull the RFC 9113 reason code out of a hyper error, if the failure was a
/// stream or connection reset.
pub fn reset_code(err: &hyper::Error) -> Option<u32> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(h2_err) = cause.downcast_ref::<h2::Error>() {
            return h2_err.reason().map(u32::from);
        }
        source = cause.source();
    }
    None
}

/// Map a hyper send/body error to our taxonomy, preferring the reset reason
/// when one is present.
pub fn classify_hyper_error(err: hyper::Error) -> Error {
    if let Some(code) = reset_code(&err) {
        return Error::ConnectionReset { code };
    }
    Error::http_protocol(err.to_string())
}

/// Build the absolute-form request HTTP/2 wants: scheme + authority on the
/// URI, no Host header.
pub fn build_request(
    method: &http::Method,
    url: &url::Url,
    headers: &[(String, String)],
    body: Option<Bytes>,
) -> Result<hyper::Request<Full<Bytes>>> {
    let mut builder = hyper::Request::builder()
        .method(method.clone())
        .uri(url.as_str());

    let header_map = builder
        .headers_mut()
        .ok_or_else(|| Error::http_protocol("failed to access request headers"))?;
    for (key, value) in headers {
        header_map.append(
            hyper::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::http_protocol(format!("invalid header name {key}: {e}")))?,
            hyper::header::HeaderValue::from_str(value)
                .map_err(|e| Error::http_protocol(format!("invalid header value: {e}")))?,
        );
    }

    builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| Error::http_protocol(format!("failed to build request: {e}")))
}
