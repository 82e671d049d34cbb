//! courier: an async HTTP client with per-hop protocol negotiation.
//!
//! Supports HTTP/1.1 and HTTP/2 (ALPN-negotiated over TLS, prior knowledge
//! over cleartext), transparent gzip/brotli decoding with a decoded-size
//! limit, redirect following that may cross protocol boundaries mid-chain,
//! connection pooling with idle and agent-identity timeouts, a cookie jar,
//! and an optional per-hop timing/debug trace.
//!
//! ```no_run
//! # async fn run() -> courier::Result<()> {
//! let client = courier::Client::builder().gzip(true).build();
//! let response = client.get("https://example.com/").send().await?;
//! println!("{} via HTTP/{}", response.status, response.http_version);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cookie;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod pool;
pub mod redirect;
pub mod timing;
pub mod trace;
pub mod transport;
pub mod version;

pub use client::{Client, ClientBuilder, RequestBuilder, Response};
pub use cookie::{Cookie, CookieJar, CookieStore};
pub use decode::TextEncoding;
pub use error::{Error, Result};
pub use options::{Request, Timeouts, TlsOptions};
pub use pool::{Pool, PoolStats};
pub use timing::{TimingPhases, TimingRecord};
pub use trace::HopTrace;
pub use version::{HttpVersion, Protocol};
