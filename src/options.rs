//! Immutable configuration records (spec.md §3).

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::backoff::BackoffPolicy;

/// Immutable options for a [`Transport`](crate::handle::TransportHandle),
/// built once by the embedding application and never mutated afterwards.
///
/// The core never reads these values from a file or environment variable
/// itself (spec.md §6); `serde` support exists so the embedding application
/// can load them from its own configuration the way the wider client does
/// for its other settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct TransportOptions {
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(with = "humantime_serde", default = "defaults::max_reconnect_backoff")]
    pub max_reconnect_backoff: Duration,
    #[serde(default)]
    pub tls: Option<TlsOptions>,
    #[serde(default = "defaults::queue_capacity")]
    pub read_queue_capacity: usize,
    #[serde(default = "defaults::queue_capacity")]
    pub write_queue_capacity: usize,
    #[serde(with = "humantime_serde", default = "defaults::dispose_timeout")]
    pub dispose_timeout: Duration,
}

impl TransportOptions {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_backoff_ms),
            self.max_reconnect_backoff,
            self.backoff_multiplier,
        )
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        TransportOptions {
            initial_backoff_ms: defaults::initial_backoff_ms(),
            backoff_multiplier: defaults::backoff_multiplier(),
            max_reconnect_backoff: defaults::max_reconnect_backoff(),
            tls: None,
            read_queue_capacity: defaults::queue_capacity(),
            write_queue_capacity: defaults::queue_capacity(),
            dispose_timeout: defaults::dispose_timeout(),
        }
    }
}

/// Mutual-TLS configuration. A `cert_ref` ending in `.pfx` (case-sensitive,
/// matching the source this spec was distilled from) is loaded as a file
/// path; any other value is treated as a subject name to look up in the
/// configured [`ClientCertificateStore`](crate::cert::ClientCertificateStore).
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct TlsOptions {
    pub client_cert_ref: String,
    pub friendly_name: Option<String>,
    password: String,
    #[serde(default)]
    pub allow_self_signed_server_cert: bool,
    #[serde(default)]
    pub self_signed_train_mode: bool,
    /// Where accepted self-signed-peer thumbprints are persisted (the
    /// portable stand-in for the machine "Trusted People" store — see
    /// DESIGN.md).
    pub trusted_peers_path: PathBuf,
}

impl TlsOptions {
    pub fn new(client_cert_ref: impl Into<String>, password: impl Into<String>) -> Self {
        TlsOptions {
            client_cert_ref: client_cert_ref.into(),
            friendly_name: None,
            password: password.into(),
            allow_self_signed_server_cert: false,
            self_signed_train_mode: false,
            trusted_peers_path: PathBuf::from("trusted-peers.txt"),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_pfx_path(&self) -> bool {
        self.client_cert_ref.ends_with(".pfx")
    }
}

impl Drop for TlsOptions {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

// Manual Debug so the password is never accidentally printed in logs.
impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("client_cert_ref", &self.client_cert_ref)
            .field("friendly_name", &self.friendly_name)
            .field("password", &"<redacted>")
            .field(
                "allow_self_signed_server_cert",
                &self.allow_self_signed_server_cert,
            )
            .field("self_signed_train_mode", &self.self_signed_train_mode)
            .field("trusted_peers_path", &self.trusted_peers_path)
            .finish()
    }
}

mod defaults {
    use std::time::Duration;

    pub const fn initial_backoff_ms() -> u64 {
        100
    }

    pub const fn backoff_multiplier() -> u32 {
        2
    }

    pub const fn max_reconnect_backoff() -> Duration {
        Duration::from_secs(5 * 60)
    }

    pub const fn queue_capacity() -> usize {
        256
    }

    pub const fn dispose_timeout() -> Duration {
        Duration::from_secs(30)
    }
}
