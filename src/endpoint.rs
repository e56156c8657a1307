//! The identity of the single broker this transport connects to.

use std::{
    fmt::{self, Display},
    io,
    net::SocketAddr,
};

use tokio::net::lookup_host;

/// A host/port pair identifying a single Kafka broker.
///
/// An `Endpoint` is immutable after construction and is used purely as an
/// identity in log messages and observability events; resolution to a
/// concrete [`SocketAddr`] happens lazily on each connect attempt (not at
/// construction), so a transport can be built before the network is
/// reachable and will pick up DNS changes across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Construct a new endpoint identity. Does not perform any I/O.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve this endpoint to a concrete socket address, using the first
    /// address returned by the system resolver.
    pub(crate) async fn resolve(&self) -> io::Result<SocketAddr> {
        let mut addrs = lookup_host((self.host.as_str(), self.port)).await?;
        addrs.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", self),
            )
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
