//! TLS secret material for the dataplane
//!
//! The graph builder asks a [`SecretRequester`] for a disk path whenever a
//! Listener certificate or a BackendTLSPolicy CA bundle resolves to a
//! Secret. [`SecretDiskManager`] validates the PEM payload, remembers the
//! request, and writes every requested bundle in one pass. Secret contents
//! are never logged.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info};

use crate::errors::{FlowgateError, Result};
use crate::resources::{NamespacedName, Secret};

pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

const BUNDLE_EXTENSION: &str = "pem";

/// What the requested Secret is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Listener certificate and private key
    TlsKeyPair,
    /// Trusted CA certificates for upstream verification
    CaBundle,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret {name} is of type '{actual}', expected '{expected}'")]
    WrongType {
        name: NamespacedName,
        expected: &'static str,
        actual: String,
    },

    #[error("Secret {name} has no '{key}' entry")]
    MissingKey {
        name: NamespacedName,
        key: &'static str,
    },

    #[error("Secret {name} entry '{key}' is not valid PEM: {message}")]
    InvalidPem {
        name: NamespacedName,
        key: &'static str,
        message: String,
    },
}

/// Turns a Secret into a file path the dataplane can read.
pub trait SecretRequester: Send + Sync {
    fn request(
        &self,
        name: &NamespacedName,
        secret: &Secret,
        kind: SecretKind,
    ) -> std::result::Result<PathBuf, SecretError>;

    /// Forget every request. Called at the start of each graph build.
    fn reset(&self) {}
}

/// Writes requested bundles as `<dir>/<namespace>_<name>.pem`.
#[derive(Debug)]
pub struct SecretDiskManager {
    dir: PathBuf,
    requested: Mutex<BTreeMap<NamespacedName, Vec<u8>>>,
}

impl SecretDiskManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            requested: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NamespacedName, Vec<u8>>> {
        self.requested.lock().expect("secret request lock poisoned")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &NamespacedName) -> PathBuf {
        let file = format!("{}_{}.{}", name.namespace, name.name, BUNDLE_EXTENSION);
        self.dir.join(file)
    }

    /// Names requested since the last reset
    pub fn requested(&self) -> Vec<NamespacedName> {
        self.lock().keys().cloned().collect()
    }

    /// Write every requested bundle and remove bundles no longer requested.
    pub fn write_all(&self) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            FlowgateError::io(
                e,
                format!("Failed to create secrets directory {}", self.dir.display()),
            )
        })?;

        let requested = self.lock().clone();
        let mut written = Vec::with_capacity(requested.len());
        for (name, bundle) in &requested {
            let path = self.path_for(name);
            fs::write(&path, bundle).map_err(|e| {
                FlowgateError::io(
                    e,
                    format!("Failed to write secret bundle {}", path.display()),
                )
            })?;
            written.push(path);
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            FlowgateError::io(
                e,
                format!("Failed to list secrets directory {}", self.dir.display()),
            )
        })?;
        for entry in entries {
            let path = entry?.path();
            let is_bundle = path.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION);
            if is_bundle && !written.contains(&path) {
                debug!(path = %path.display(), "Removing stale secret bundle");
                fs::remove_file(&path).map_err(|e| {
                    FlowgateError::io(e, format!("Failed to remove {}", path.display()))
                })?;
            }
        }

        info!(count = written.len(), dir = %self.dir.display(), "Wrote secret bundles");
        Ok(written)
    }
}

impl SecretRequester for SecretDiskManager {
    fn request(
        &self,
        name: &NamespacedName,
        secret: &Secret,
        kind: SecretKind,
    ) -> std::result::Result<PathBuf, SecretError> {
        let bundle = match kind {
            SecretKind::TlsKeyPair => tls_key_pair_bundle(name, secret)?,
            SecretKind::CaBundle => ca_bundle(name, secret)?,
        };

        self.lock().insert(name.clone(), bundle);
        Ok(self.path_for(name))
    }

    fn reset(&self) {
        self.lock().clear();
    }
}

fn entry<'a>(
    name: &NamespacedName,
    secret: &'a Secret,
    key: &'static str,
) -> std::result::Result<&'a [u8], SecretError> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.as_slice())
        .ok_or_else(|| SecretError::MissingKey {
            name: name.clone(),
            key,
        })
}

fn parse_certificates(
    name: &NamespacedName,
    key: &'static str,
    pem: &[u8],
) -> std::result::Result<(), SecretError> {
    let invalid = |message: String| SecretError::InvalidPem {
        name: name.clone(),
        key,
        message,
    };

    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    if certificates.is_empty() {
        return Err(invalid("no certificates found".to_string()));
    }
    Ok(())
}

fn tls_key_pair_bundle(
    name: &NamespacedName,
    secret: &Secret,
) -> std::result::Result<Vec<u8>, SecretError> {
    let actual = secret.type_.clone().unwrap_or_default();
    if actual != TLS_SECRET_TYPE {
        return Err(SecretError::WrongType {
            name: name.clone(),
            expected: TLS_SECRET_TYPE,
            actual,
        });
    }

    let cert = entry(name, secret, TLS_CERT_KEY)?;
    let key = entry(name, secret, TLS_PRIVATE_KEY_KEY)?;

    parse_certificates(name, TLS_CERT_KEY, cert)?;
    PrivateKeyDer::from_pem_slice(key).map_err(|e| SecretError::InvalidPem {
        name: name.clone(),
        key: TLS_PRIVATE_KEY_KEY,
        message: e.to_string(),
    })?;

    let mut bundle = Vec::with_capacity(cert.len() + key.len() + 1);
    bundle.extend_from_slice(cert);
    if !cert.ends_with(b"\n") {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(key);
    Ok(bundle)
}

fn ca_bundle(name: &NamespacedName, secret: &Secret) -> std::result::Result<Vec<u8>, SecretError> {
    let ca = entry(name, secret, CA_CERT_KEY)?;
    parse_certificates(name, CA_CERT_KEY, ca)?;
    Ok(ca.to_vec())
}
