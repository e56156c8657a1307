//! Connection establishment, plain or TLS-wrapped (component 4.4).

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use native_tls::Protocol;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tracing::{debug, warn};

use crate::{
    cert::{resolve_certificate_pkcs12, ClientCertificateStore},
    endpoint::Endpoint,
    error::TransportError,
    options::TransportOptions,
    tls_trust::{evaluate, thumbprint_hex, TrustDecision, TrustedPeerStore},
};

/// A connected byte stream, plain or TLS-wrapped, opaque to the rest of the
/// transport. Modeled on the teacher's `transport::io_stream::IoStream`
/// enum so `TransportLoop` never has to care which variant it holds.
pub enum IoStream {
    Plain(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Open a connection to `endpoint`, optionally wrapping it in TLS per
/// `options.tls`. Any failure is surfaced as [`TransportError::ConnectFailed`]
/// or [`TransportError::HandshakeFailed`].
///
/// Exactly one outstanding connect attempt per transport is allowed; that
/// serialization is the responsibility of the caller
/// ([`TransportLoop`](crate::transport_loop)), not this function.
pub async fn connect(
    endpoint: &Endpoint,
    options: &TransportOptions,
    cert_store: &dyn ClientCertificateStore,
    trusted_peers: &dyn TrustedPeerStore,
) -> Result<IoStream, TransportError> {
    let addr = endpoint
        .resolve()
        .await
        .map_err(|err| TransportError::ConnectFailed(Arc::new(err)))?;

    let tcp_stream = TcpStream::connect(addr)
        .await
        .map_err(|err| TransportError::ConnectFailed(Arc::new(err)))?;
    tcp_stream
        .set_nodelay(true)
        .map_err(|err| TransportError::ConnectFailed(Arc::new(err)))?;

    let tls_options = match &options.tls {
        None => return Ok(IoStream::Plain(tcp_stream)),
        Some(tls_options) => tls_options,
    };

    let pkcs12_der = resolve_certificate_pkcs12(tls_options, cert_store)?;
    let identity = native_tls::Identity::from_pkcs12(&pkcs12_der, tls_options.password())
        .map_err(|err| {
            TransportError::CertificateLoadFailed(Arc::new(io::Error::new(
                io::ErrorKind::InvalidData,
                err,
            )))
        })?;

    let domain = endpoint.host();

    // Step 1: ordinary validation against the platform trust store.
    let strict = build_connector(identity, false)?;
    match tokio_native_tls::TlsConnector::from(strict)
        .connect(domain, tcp_stream)
        .await
    {
        Ok(stream) => Ok(IoStream::Tls(Box::new(stream))),
        Err(strict_err) => {
            if !tls_options.allow_self_signed_server_cert {
                return Err(handshake_failed(strict_err));
            }
            debug!(
                %endpoint,
                "strict TLS validation failed ({strict_err}), falling back to pinned-trust mode"
            );
            connect_with_pinned_trust(endpoint, addr, &pkcs12_der, tls_options, trusted_peers)
                .await
        }
    }
}

/// Step 2-5 of spec.md §4.3: a fresh TCP connection (the first handshake
/// attempt consumed the original one), validated permissively, then
/// accepted or rejected by thumbprint against the trusted-peers store.
async fn connect_with_pinned_trust(
    endpoint: &Endpoint,
    addr: std::net::SocketAddr,
    pkcs12_der: &[u8],
    tls_options: &crate::options::TlsOptions,
    trusted_peers: &dyn TrustedPeerStore,
) -> Result<IoStream, TransportError> {
    let tcp_stream = TcpStream::connect(addr)
        .await
        .map_err(|err| TransportError::ConnectFailed(Arc::new(err)))?;
    tcp_stream
        .set_nodelay(true)
        .map_err(|err| TransportError::ConnectFailed(Arc::new(err)))?;

    let identity = native_tls::Identity::from_pkcs12(pkcs12_der, tls_options.password())
        .map_err(|err| {
            TransportError::CertificateLoadFailed(Arc::new(io::Error::new(
                io::ErrorKind::InvalidData,
                err,
            )))
        })?;
    let permissive = build_connector(identity, true)?;
    let stream = tokio_native_tls::TlsConnector::from(permissive)
        .connect(endpoint.host(), tcp_stream)
        .await
        .map_err(handshake_failed)?;

    let peer_cert = stream
        .get_ref()
        .peer_certificate()
        .map_err(handshake_failed)?
        .ok_or_else(|| {
            TransportError::HandshakeFailed(Arc::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "server presented no certificate",
            )))
        })?;
    let der = peer_cert.to_der().map_err(handshake_failed)?;
    let thumbprint = thumbprint_hex(&der);

    match evaluate(
        tls_options.allow_self_signed_server_cert,
        tls_options.self_signed_train_mode,
        true,
        &thumbprint,
        trusted_peers,
    )? {
        TrustDecision::Accept => Ok(IoStream::Tls(Box::new(stream))),
        TrustDecision::Reject => {
            warn!(%endpoint, thumbprint, "rejecting untrusted self-signed server certificate");
            Err(TransportError::HandshakeFailed(Arc::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "server certificate is not in the trusted-peers store",
            ))))
        }
    }
}

fn handshake_failed(err: native_tls::Error) -> TransportError {
    TransportError::HandshakeFailed(Arc::new(io::Error::new(io::ErrorKind::Other, err)))
}

fn build_connector(
    identity: native_tls::Identity,
    accept_self_signed: bool,
) -> Result<native_tls::TlsConnector, TransportError> {
    let mut builder = native_tls::TlsConnector::builder();
    builder
        .identity(identity)
        .min_protocol_version(Some(Protocol::Tlsv12));
    if accept_self_signed {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    builder.build().map_err(handshake_failed)
}
