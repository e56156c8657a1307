//! Client certificate resolution (component 4.2).
//!
//! The source enumerates the Windows machine-local "personal" certificate
//! store by subject name. That API has no portable equivalent, so it is
//! abstracted here behind [`ClientCertificateStore`] (Design Notes: "Cert
//! store access ... abstract behind a `CertificateResolver` and
//! `TrustedPeerStore` interface so non-Windows platforms can plug in a
//! file-based equivalent"). [`FileCertificateStore`] is that file-based
//! equivalent: a directory of `<subject>/*.pfx` files, each optionally
//! paired with a `<name>.friendly-name` sidecar text file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{error::TransportError, options::TlsOptions};

/// One certificate found while searching a [`ClientCertificateStore`] by
/// subject name.
pub struct StoredCertificate {
    pub friendly_name: Option<String>,
    /// Raw PKCS#12 (`.pfx`) bytes for this certificate and its private key.
    pub pkcs12_der: Vec<u8>,
}

/// A source of client certificates, keyed by subject name. Implementations
/// do not need to be async: resolution happens once, before a connect
/// attempt, and is expected to be a cheap local lookup.
pub trait ClientCertificateStore: Send + Sync {
    /// Return every certificate whose subject name equals `subject`, in no
    /// particular order.
    fn find_by_subject(&self, subject: &str) -> Result<Vec<StoredCertificate>, TransportError>;
}

/// A directory-backed stand-in for the machine personal certificate store.
///
/// Certificates live at `<root>/<subject>/<anything>.pfx`; a sidecar file
/// with the same stem and a `.friendly-name` extension, if present, supplies
/// that file's friendly name.
pub struct FileCertificateStore {
    root: PathBuf,
}

impl FileCertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileCertificateStore { root: root.into() }
    }
}

impl ClientCertificateStore for FileCertificateStore {
    fn find_by_subject(&self, subject: &str) -> Result<Vec<StoredCertificate>, TransportError> {
        let dir = self.root.join(subject);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(TransportError::CertificateLoadFailed(err.into())),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| TransportError::CertificateLoadFailed(err.into()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pfx") {
                continue;
            }
            let pkcs12_der =
                fs::read(&path).map_err(|err| TransportError::CertificateLoadFailed(err.into()))?;
            let friendly_name = friendly_name_sidecar(&path);
            found.push(StoredCertificate {
                friendly_name,
                pkcs12_der,
            });
        }
        Ok(found)
    }
}

fn friendly_name_sidecar(pfx_path: &Path) -> Option<String> {
    let sidecar = pfx_path.with_extension("friendly-name");
    fs::read_to_string(sidecar)
        .ok()
        .map(|s| s.trim().to_owned())
}

/// Resolve `options` to a loadable PKCS#12 identity, per spec.md §4.2:
///
/// 1. If `client_cert_ref` ends in `.pfx`, load that file directly.
/// 2. Otherwise, search `store` by subject name; prefer a match whose
///    friendly name equals `options.friendly_name`, falling back to the
///    first match; fail with [`TransportError::CertificateNotFound`] if
///    there are no matches at all.
pub fn resolve_certificate_pkcs12(
    options: &TlsOptions,
    store: &dyn ClientCertificateStore,
) -> Result<Vec<u8>, TransportError> {
    if options.is_pfx_path() {
        return fs::read(&options.client_cert_ref)
            .map_err(|err| TransportError::CertificateLoadFailed(err.into()));
    }

    let mut candidates = store.find_by_subject(&options.client_cert_ref)?;
    if candidates.is_empty() {
        return Err(TransportError::CertificateNotFound(
            options.client_cert_ref.clone(),
        ));
    }

    let preferred_index = options.friendly_name.as_deref().and_then(|name| {
        candidates
            .iter()
            .position(|cert| cert.friendly_name.as_deref() == Some(name))
    });
    let index = preferred_index.unwrap_or(0);
    Ok(candidates.swap_remove(index).pkcs12_der)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pfx(dir: &Path, subject: &str, file: &str, bytes: &[u8], friendly_name: Option<&str>) {
        let subject_dir = dir.join(subject);
        fs::create_dir_all(&subject_dir).unwrap();
        fs::write(subject_dir.join(file), bytes).unwrap();
        if let Some(name) = friendly_name {
            fs::write(
                subject_dir.join(file).with_extension("friendly-name"),
                name,
            )
            .unwrap();
        }
    }

    #[test]
    fn pfx_path_is_loaded_directly() {
        let dir = tempdir();
        let pfx_path = dir.path().join("direct.pfx");
        fs::write(&pfx_path, b"pfx-bytes").unwrap();

        let mut options = TlsOptions::new(pfx_path.to_str().unwrap(), "pw");
        options.friendly_name = None;

        let store = FileCertificateStore::new(dir.path());
        let bytes = resolve_certificate_pkcs12(&options, &store).unwrap();
        assert_eq!(bytes, b"pfx-bytes");
    }

    #[test]
    fn subject_lookup_prefers_friendly_name_match() {
        let dir = tempdir();
        write_pfx(dir.path(), "broker.example.com", "a.pfx", b"A", Some("old"));
        write_pfx(dir.path(), "broker.example.com", "b.pfx", b"B", Some("current"));

        let mut options = TlsOptions::new("broker.example.com", "pw");
        options.friendly_name = Some("current".to_owned());

        let store = FileCertificateStore::new(dir.path());
        let bytes = resolve_certificate_pkcs12(&options, &store).unwrap();
        assert_eq!(bytes, b"B");
    }

    #[test]
    fn subject_lookup_falls_back_to_first_match() {
        let dir = tempdir();
        write_pfx(dir.path(), "broker.example.com", "a.pfx", b"A", None);

        let mut options = TlsOptions::new("broker.example.com", "pw");
        options.friendly_name = Some("nonexistent".to_owned());

        let store = FileCertificateStore::new(dir.path());
        let bytes = resolve_certificate_pkcs12(&options, &store).unwrap();
        assert_eq!(bytes, b"A");
    }

    #[test]
    fn missing_subject_is_certificate_not_found() {
        let dir = tempdir();
        let options = TlsOptions::new("nobody.example.com", "pw");
        let store = FileCertificateStore::new(dir.path());
        let err = resolve_certificate_pkcs12(&options, &store).unwrap_err();
        assert!(matches!(err, TransportError::CertificateNotFound(_)));
    }

    /// Minimal throwaway-directory helper so these tests don't need a
    /// `tempfile` dependency for a handful of small files.
    struct TempDir(PathBuf);
    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let dir = std::env::temp_dir().join(format!(
            "kafka-transport-cert-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}
