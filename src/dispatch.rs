//! Protocol dispatch: per-hop transport selection.
//!
//! Run once per hop, so a redirect chain that crosses schemes re-selects its
//! transport and may change protocol mid-chain.

use crate::error::{Error, Result};
use crate::version::{HttpVersion, Protocol};

/// Outcome of dispatching one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The protocol is known before connecting (cleartext, or a forced
    /// preference).
    Fixed(Protocol),
    /// TLS ALPN decides; the listed protocols are offered in order. A peer
    /// that negotiates nothing gets HTTP/1.1.
    Alpn(Vec<Vec<u8>>),
}

impl Negotiation {
    /// ALPN protocol list to offer during the TLS handshake.
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            Self::Fixed(Protocol::H1) => vec![b"http/1.1".to_vec()],
            Self::Fixed(Protocol::H2) => vec![b"h2".to_vec()],
            Self::Alpn(list) => list.clone(),
        }
    }
}

/// Select the transport for a hop from its URL scheme and the request's
/// protocol preference.
///
/// `http` + `Http2` is HTTP/2 with prior knowledge over cleartext; `http` +
/// `Auto` always resolves to HTTP/1.1 (no upgrade dance).
pub fn resolve(scheme: &str, preference: HttpVersion) -> Result<Negotiation> {
    match (scheme, preference) {
        ("http", HttpVersion::Http2) => Ok(Negotiation::Fixed(Protocol::H2)),
        ("http", _) => Ok(Negotiation::Fixed(Protocol::H1)),
        ("https", HttpVersion::Http1) => Ok(Negotiation::Fixed(Protocol::H1)),
        ("https", HttpVersion::Http2) => Ok(Negotiation::Fixed(Protocol::H2)),
        ("https", HttpVersion::Auto) => Ok(Negotiation::Alpn(vec![
            b"h2".to_vec(),
            b"http/1.1".to_vec(),
        ])),
        (other, _) => Err(Error::http_protocol(format!(
            "unsupported URL scheme: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleartext_auto_is_http1() {
        assert_eq!(
            resolve("http", HttpVersion::Auto).unwrap(),
            Negotiation::Fixed(Protocol::H1)
        );
    }

    #[test]
    fn cleartext_http2_is_prior_knowledge() {
        assert_eq!(
            resolve("http", HttpVersion::Http2).unwrap(),
            Negotiation::Fixed(Protocol::H2)
        );
    }

    #[test]
    fn https_auto_offers_both_alpn() {
        let neg = resolve("https", HttpVersion::Auto).unwrap();
        assert_eq!(
            neg.alpn_protocols(),
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn forced_preference_offers_single_alpn() {
        let neg = resolve("https", HttpVersion::Http2).unwrap();
        assert_eq!(neg.alpn_protocols(), vec![b"h2".to_vec()]);
        let neg = resolve("https", HttpVersion::Http1).unwrap();
        assert_eq!(neg.alpn_protocols(), vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        assert!(resolve("ftp", HttpVersion::Auto).is_err());
    }
}
