//! A resilient, duplex, request-oriented TCP transport to a single endpoint.
//!
//! A [`handle::TransportHandle`] owns one multiplexed connection (plain TCP
//! or TLS) and reconnects it transparently, with exponential backoff, across
//! transient network failures. Callers queue reads and writes through the
//! handle; the owning [`transport_loop::TransportLoop`] serializes at most
//! one in-flight operation per direction against whatever connection is
//! currently live, and retries across reconnects rather than surfacing the
//! disconnect to every in-flight caller.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use kafka_transport::{
//!     cert::FileCertificateStore, endpoint::Endpoint, handle::TransportHandle,
//!     options::TransportOptions, tls_trust::NullTrustedPeerStore,
//! };
//!
//! let transport = TransportHandle::new(
//!     Endpoint::new("broker.example.com", 9093),
//!     TransportOptions::default(),
//!     Arc::new(FileCertificateStore::new("/etc/kafka/certs")),
//!     Arc::new(NullTrustedPeerStore),
//! );
//!
//! let bytes = transport.read_async(4, None).await?;
//! transport.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cert;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod handle;
pub mod options;
pub mod queue;
pub mod tls_trust;
pub mod transport_loop;

pub use endpoint::Endpoint;
pub use error::TransportError;
pub use events::TransportEvent;
pub use handle::TransportHandle;
pub use options::{TlsOptions, TransportOptions};
pub use queue::{WriteCompletion, WritePayload};
