//! HTTP/1.1 connection via hyper's client conn API.
//!
//! One in-flight request at a time; the connection is returned to the pool
//! only once the response body has been fully drained and the sender reports
//! ready again.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::connector::{MaybeTlsStream, TlsDetails};

/// An established HTTP/1.1 connection.
#[derive(Debug)]
pub struct H1Connection {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    tls: Option<TlsDetails>,
    addresses: Vec<String>,
}

impl H1Connection {
    pub async fn handshake(
        stream: MaybeTlsStream,
        authorized: bool,
        addresses: Vec<String>,
    ) -> Result<Self> {
        let tls = stream.tls_details(authorized);
        let io = TokioIo::new(stream);
        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/1.1 handshake failed: {e}")))?;
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("HTTP/1.1 connection ended: {e}");
            }
        });
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

    /// Remote addresses the connection resolved to, kept for the trace.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Whether the peer (or the driver) has shut the connection down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.driver.is_finished()
    }

    /// Wait until the connection can carry another request.
    pub async fn ready(&mut self) -> Result<()> {
        self.sender
            .ready()
            .await
            .map_err(|e| Error::connection(format!("HTTP/1.1 connection not reusable: {e}")))
    }

    pub async fn send(
        &mut self,
        request: hyper::Request<Full<Bytes>>,
    ) -> std::result::Result<hyper::Response<Incoming>, hyper::Error> {
        self.sender.send_request(request).await
    }

    /// Tear the connection down immediately.
    pub fn close(self) {
        self.driver.abort();
    }
}

impl Drop for H1Connection {
    fn drop(&mut self) {
        // The driver finishes on its own once the sender is gone; aborting
        // here just makes eviction prompt.
        self.driver.abort();
    }
}

/// Build the origin-form request HTTP/1.1 expects: path + query in the
/// request target, authority in the Host header.
pub fn build_request(
    method: &http::Method,
    url: &url::Url,
    headers: &[(String, String)],
    body: Option<Bytes>,
) -> Result<hyper::Request<Full<Bytes>>> {
    let mut target = url.path().to_string();
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }

    let mut builder = hyper::Request::builder().method(method.clone()).uri(target);

    let host_value = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        _ => return Err(Error::http_protocol("request URL has no host")),
    };

    let header_map = builder
        .headers_mut()
        .ok_or_else(|| Error::http_protocol("failed to access request headers"))?;
    header_map.insert(
        hyper::header::HOST,
        hyper::header::HeaderValue::from_str(&host_value)
            .map_err(|e| Error::http_protocol(format!("invalid host header: {e}")))?,
    );
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
