//! Redirect following.
//!
//! Each hop is dispatched independently, so a chain may cross scheme and
//! protocol boundaries: an HTTP/2 response can redirect to a target that only
//! speaks HTTP/1.1 and vice versa. Method rewriting follows browser practice:
//! 303 always becomes GET, 301/302 downgrade POST to GET, 307/308 preserve
//! the method and body.

use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::options::Request;

/// Maximum hops before the chain fails with `REDIRECT_LIMIT`.
pub const MAX_REDIRECTS: u32 = 10;

pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Method to use on the next hop and whether the body travels with it.
pub fn rewrite_method(status: u16, method: &Method) -> (Method, bool) {
    match status {
        303 => (Method::GET, false),
        301 | 302 if *method == Method::POST => (Method::GET, false),
        _ => (method.clone(), true),
    }
}

/// Resolve a `Location` value against the URL that produced it. Relative
/// references resolve per RFC 3986; an unresolvable value fails the chain.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    base.join(location)
        .map_err(|e| Error::InvalidRedirectUrl(format!("{location}: {e}")))
}

/// Derive the request for the next hop.
///
/// Host and Cookie headers are per-hop artifacts and never carried over;
/// content headers are dropped with the body. Authorization does not cross
/// an origin change.
pub fn derive_for_redirect(request: &Request, status: u16, location: &str) -> Result<Request> {
    let next_url = resolve_location(&request.url, location)?;
    let (method, keep_body) = rewrite_method(status, &request.method);

    let same_origin = next_url.host_str() == request.url.host_str()
        && next_url.port_or_known_default() == request.url.port_or_known_default()
        && next_url.scheme() == request.url.scheme();

    let headers = request
        .headers
        .iter()
        .filter(|(k, _)| {
            if k.eq_ignore_ascii_case("host") || k.eq_ignore_ascii_case("cookie") {
                return false;
            }
            if !keep_body
                && (k.eq_ignore_ascii_case("content-length")
                    || k.eq_ignore_ascii_case("content-type")
                    || k.eq_ignore_ascii_case("content-encoding"))
            {
                return false;
            }
            if !same_origin && k.eq_ignore_ascii_case("authorization") {
                return false;
            }
            true
        })
        .cloned()
        .collect();

    let mut next = request.clone();
    next.url = next_url;
    next.method = method;
    next.headers = headers;
    if !keep_body {
        next.body = None;
    }
    Ok(next)
}
