//! Transport layer: connector plus the two protocol implementations behind
//! one connect/send/close contract.

pub mod connector;
pub mod h1;
pub mod h2;

pub use connector::{AlpnProtocol, Connector, Established, MaybeTlsStream, TlsDetails};
pub use h1::H1Connection;
pub use h2::H2Connection;
