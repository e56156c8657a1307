//! Server certificate trust policy (component 4.3).
//!
//! Implements the five-step policy from spec.md §4.3 as a pure decision
//! function over a thumbprint and a [`TrustedPeerStore`], so it can be unit
//! tested without ever opening a socket. [`crate::connection`] is the only
//! caller that has to actually drive a TLS handshake and feed this function
//! its inputs.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use sha2::{Digest, Sha256};

use crate::error::TransportError;

/// The "Trusted People" store: a set of server-certificate thumbprints this
/// transport has chosen to pin, either because an operator pre-populated it
/// or because train mode auto-pinned a first contact.
pub trait TrustedPeerStore: Send + Sync {
    fn contains(&self, thumbprint: &str) -> Result<bool, TransportError>;
    fn add(&self, thumbprint: &str) -> Result<(), TransportError>;
}

/// File-backed [`TrustedPeerStore`]: one hex-encoded SHA-256 thumbprint per
/// line. This is the portable stand-in for the machine "Trusted People"
/// store (Design Notes).
pub struct FileTrustedPeerStore {
    path: PathBuf,
    // Guards read-modify-write of the file against concurrent `add` calls;
    // `contains`/`add` are rare (at most once per reconnect), so a mutex
    // around ordinary blocking file I/O is simpler than async file I/O here.
    lock: Mutex<()>,
}

impl FileTrustedPeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTrustedPeerStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.path)
            .map(|contents| {
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl TrustedPeerStore for FileTrustedPeerStore {
    fn contains(&self, thumbprint: &str) -> Result<bool, TransportError> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_lines().iter().any(|line| line == thumbprint))
    }

    fn add(&self, thumbprint: &str) -> Result<(), TransportError> {
        let _guard = self.lock.lock().unwrap();
        let mut lines = self.read_lines();
        if lines.iter().any(|line| line == thumbprint) {
            return Ok(());
        }
        lines.push(thumbprint.to_owned());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| TransportError::IoFailure(err.into()))?;
            }
        }
        fs::write(&self.path, lines.join("\n") + "\n")
            .map_err(|err| TransportError::IoFailure(err.into()))
    }
}

/// A trust store that contains nothing and rejects every `add` — used when
/// `allow_self_signed_server_cert` is false, so misconfiguration can never
/// silently pin a certificate.
pub struct NullTrustedPeerStore;

impl TrustedPeerStore for NullTrustedPeerStore {
    fn contains(&self, _thumbprint: &str) -> Result<bool, TransportError> {
        Ok(false)
    }

    fn add(&self, _thumbprint: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// SHA-256 thumbprint of a DER-encoded certificate, hex-encoded.
pub fn thumbprint_hex(cert_der: &[u8]) -> String {
    hex::encode(Sha256::digest(cert_der))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    Reject,
}

/// The five-step policy of spec.md §4.3, expressed as a pure function.
///
/// `library_validation_failed` is whatever the TLS backend reported after
/// attempting ordinary chain-of-trust validation (step 1).
pub fn evaluate(
    allow_self_signed_server_cert: bool,
    self_signed_train_mode: bool,
    library_validation_failed: bool,
    thumbprint: &str,
    trusted_peers: &dyn TrustedPeerStore,
) -> Result<TrustDecision, TransportError> {
    if !library_validation_failed {
        return Ok(TrustDecision::Accept);
    }
    if !allow_self_signed_server_cert {
        return Ok(TrustDecision::Reject);
    }
    if trusted_peers.contains(thumbprint)? {
        return Ok(TrustDecision::Accept);
    }
    if self_signed_train_mode {
        trusted_peers.add(thumbprint)?;
        return Ok(TrustDecision::Accept);
    }
    Ok(TrustDecision::Reject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    struct InMemoryStore(StdMutex<HashSet<String>>);
    impl InMemoryStore {
        fn new() -> Self {
            InMemoryStore(StdMutex::new(HashSet::new()))
        }
    }
    impl TrustedPeerStore for InMemoryStore {
        fn contains(&self, thumbprint: &str) -> Result<bool, TransportError> {
            Ok(self.0.lock().unwrap().contains(thumbprint))
        }
        fn add(&self, thumbprint: &str) -> Result<(), TransportError> {
            self.0.lock().unwrap().insert(thumbprint.to_owned());
            Ok(())
        }
    }

    #[test]
    fn library_trusted_cert_is_always_accepted() {
        let store = InMemoryStore::new();
        let decision = evaluate(false, false, false, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Accept);
    }

    #[test]
    fn untrusted_cert_rejected_when_self_signed_disallowed() {
        let store = InMemoryStore::new();
        let decision = evaluate(false, false, true, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Reject);
    }

    #[test]
    fn pinned_thumbprint_is_accepted() {
        let store = InMemoryStore::new();
        store.add("deadbeef").unwrap();
        let decision = evaluate(true, false, true, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Accept);
    }

    #[test]
    fn train_mode_pins_once_and_accepts() {
        let store = InMemoryStore::new();
        assert!(!store.contains("deadbeef").unwrap());
        let decision = evaluate(true, true, true, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Accept);
        assert!(store.contains("deadbeef").unwrap());

        // A second contact with the same thumbprint does not re-add it.
        let decision = evaluate(true, true, true, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Accept);
    }

    #[test]
    fn unpinned_and_not_training_is_rejected() {
        let store = InMemoryStore::new();
        let decision = evaluate(true, false, true, "deadbeef", &store).unwrap();
        assert_eq!(decision, TrustDecision::Reject);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let path = std::env::temp_dir().join(format!(
            "kafka-transport-trust-test-{}.txt",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);

        {
            let store = FileTrustedPeerStore::new(&path);
            store.add("abc123").unwrap();
        }
        {
            let store = FileTrustedPeerStore::new(&path);
            assert!(store.contains("abc123").unwrap());
        }
        let _ = fs::remove_file(&path);
    }
}
