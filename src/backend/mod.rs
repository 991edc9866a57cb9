//! Minimal MySQL client used for probing backends
//!
//! The monitor only needs a sliver of the protocol: connect and
//! authenticate, ping, and run the handful of introspection queries the
//! strategies issue. This module carries exactly that sliver.

mod connection;
mod handshake;
mod protocol;

pub use connection::{BackendConnection, ConnectionError, ConnectionSettings, ResultSet};
pub use protocol::err_code;
