//! Handshake-ready certificate material shared by the cache, the
//! preconfigured store and the generator.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a certificate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateOrigin {
    /// Minted on demand and signed by the CA identity
    Generated,

    /// Statically supplied for one domain
    Preconfigured,
}

/// A certificate chain plus signing key, ready to present in a handshake
pub struct IssuedCertificate {
    name: String,
    origin: CertificateOrigin,
    certified_key: Arc<CertifiedKey>,
}

impl IssuedCertificate {
    /// Bundle a chain (leaf first) with its private key
    pub fn new(
        name: impl Into<String>,
        origin: CertificateOrigin,
        chain: Vec<CertificateDer<'static>>,
        key: &PrivateKeyDer<'_>,
    ) -> Result<Self, rustls::Error> {
        if chain.is_empty() {
            return Err(rustls::Error::General("empty certificate chain".to_string()));
        }

        let signing_key = rustls::crypto::ring::sign::any_supported_type(key)?;

        Ok(Self {
            name: name.into(),
            origin,
            certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
        })
    }

    /// Name this certificate was issued or configured for
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> CertificateOrigin {
        self.origin
    }

    /// Full chain, leaf first
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.certified_key.cert
    }

    /// Leaf certificate DER
    pub fn leaf_der(&self) -> &CertificateDer<'static> {
        &self.certified_key.cert[0]
    }

    /// rustls view, handed to the certificate-selection hook
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("chain_len", &self.certified_key.cert.len())
            .finish()
    }
}
