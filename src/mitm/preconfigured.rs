//! Preconfigured Certificate Store
//!
//! Statically supplied certificate/key pairs keyed by exact domain. Entries
//! are parsed into handshake-ready form once, at load, and are never evicted.

use crate::mitm::error::StartupError;
use crate::mitm::issued::{CertificateOrigin, IssuedCertificate};
use parking_lot::RwLock;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
pub struct PreconfiguredStore {
    entries: RwLock<HashMap<String, Arc<IssuedCertificate>>>,
}

impl PreconfiguredStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate chain (leaf first) and key for `domain`,
    /// replacing any previous entry
    pub fn insert(
        &self,
        domain: &str,
        chain: Vec<CertificateDer<'static>>,
        key: &PrivateKeyDer<'_>,
    ) -> Result<Arc<IssuedCertificate>, StartupError> {
        let issued = IssuedCertificate::new(domain, CertificateOrigin::Preconfigured, chain, key)
            .map_err(|e| StartupError::preconfigured(domain, e.to_string()))?;
        let issued = Arc::new(issued);

        self.entries
            .write()
            .insert(domain.to_string(), Arc::clone(&issued));
        info!(domain = %domain, "preconfigured certificate registered");

        Ok(issued)
    }

    /// Register PEM-encoded chain and key text for `domain`
    pub fn insert_pem(
        &self,
        domain: &str,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Arc<IssuedCertificate>, StartupError> {
        let chain = read_chain(domain, &mut &cert_pem[..])?;
        let key = read_key(domain, &mut &key_pem[..])?;
        self.insert(domain, chain, &key)
    }

    /// Load PEM chain and key files for `domain`
    pub fn load_from_files(
        &self,
        domain: &str,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Arc<IssuedCertificate>, StartupError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_file = File::open(cert_path).map_err(|e| {
            StartupError::preconfigured(domain, format!("{}: {}", cert_path.display(), e))
        })?;
        let chain = read_chain(domain, &mut BufReader::new(cert_file))?;

        let key_file = File::open(key_path).map_err(|e| {
            StartupError::preconfigured(domain, format!("{}: {}", key_path.display(), e))
        })?;
        let key = read_key(domain, &mut BufReader::new(key_file))?;

        self.insert(domain, chain, &key)
    }

    /// Exact-match lookup
    pub fn get(&self, domain: &str) -> Option<Arc<IssuedCertificate>> {
        self.entries.read().get(domain).cloned()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.entries.read().contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered domains, unordered
    pub fn domains(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

fn read_chain(
    domain: &str,
    reader: &mut dyn std::io::BufRead,
) -> Result<Vec<CertificateDer<'static>>, StartupError> {
    let chain = rustls_pemfile::certs(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StartupError::preconfigured(domain, format!("bad certificate PEM: {}", e)))?;

    if chain.is_empty() {
        return Err(StartupError::preconfigured(domain, "no certificates found"));
    }
    Ok(chain)
}

fn read_key(
    domain: &str,
    reader: &mut dyn std::io::BufRead,
) -> Result<PrivateKeyDer<'static>, StartupError> {
    rustls_pemfile::private_key(reader)
        .map_err(|e| StartupError::preconfigured(domain, format!("bad key PEM: {}", e)))?
        .ok_or_else(|| StartupError::preconfigured(domain, "no private key found"))
}
