//! CA Identity - Loads the signing CA used to mint leaf certificates
//!
//! The CA certificate and RSA private key are read from PEM files once, at
//! construction. The key may be a PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8
//! (`PRIVATE KEY`) container; PKCS#1 is tried first. Once loaded the identity
//! is immutable and shared behind an `Arc`.

use crate::mitm::error::StartupError;
use rcgen::{Issuer, KeyPair};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls_pemfile::Item;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::path::Path;
use tracing::{info, warn};

/// CA certificate + private key used to sign every generated leaf
pub struct CaIdentity {
    /// Signing half (CA distinguished name + key), never logged
    issuer: Issuer<'static, KeyPair>,

    /// CA certificate exactly as loaded, appended to every leaf chain
    cert_der: CertificateDer<'static>,

    /// CA certificate PEM (for trust distribution)
    cert_pem: String,

    /// Subject DN, for logs
    subject: String,
}

impl CaIdentity {
    /// Load the CA from a certificate file and a private key file (both PEM).
    ///
    /// Any failure here is a configuration error: the engine must not enter
    /// MITM mode without a usable CA.
    pub fn load(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, StartupError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        info!(cert_path = %cert_path.display(), key_path = %key_path.display(), "Loading CA identity");

        let cert_pem =
            std::fs::read_to_string(cert_path).map_err(|e| StartupError::CaCertUnreadable {
                path: cert_path.display().to_string(),
                source: e,
            })?;

        let key_pem = std::fs::read_to_string(key_path)
            .map(SecretString::new)
            .map_err(|e| StartupError::CaKeyUnreadable {
                path: key_path.display().to_string(),
                source: e,
            })?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Build the CA from in-memory PEM text
    pub fn from_pem(cert_pem: &str, key_pem: &SecretString) -> Result<Self, StartupError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| {
                StartupError::CaCertInvalid("failed to decode CA certificate PEM".to_string())
            })?
            .map_err(|e| StartupError::CaCertInvalid(format!("PEM decode failed: {}", e)))?;

        let subject = validate_ca_certificate(&cert_der)?;

        let key_der = decode_key_block(key_pem)?;
        let key_pair = rsa_signing_key(key_der.expose_secret())?;

        let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| StartupError::CaCertInvalid(format!("issuer setup failed: {}", e)))?;

        info!(subject = %subject, "CA identity loaded and validated");

        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
            subject,
        })
    }

    /// CA certificate in DER form
    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// CA certificate in PEM form (safe to distribute to clients)
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// CA subject distinguished name
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }
}

// Private key stays out of Debug output
impl std::fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaIdentity")
            .field("subject", &self.subject)
            .field("key_pair", &"<REDACTED>")
            .finish()
    }
}

/// Extract the DER body of the first private-key block, whatever its label
fn decode_key_block(key_pem: &SecretString) -> Result<SecretVec<u8>, StartupError> {
    rustls_pemfile::read_all(&mut key_pem.expose_secret().as_bytes())
        .filter_map(|item| match item {
            Ok(Item::Pkcs1Key(key)) => Some(key.secret_pkcs1_der().to_vec()),
            Ok(Item::Pkcs8Key(key)) => Some(key.secret_pkcs8_der().to_vec()),
            Ok(Item::Sec1Key(key)) => Some(key.secret_sec1_der().to_vec()),
            _ => None,
        })
        .next()
        .map(SecretVec::new)
        .ok_or(StartupError::KeyPemInvalid)
}

/// Parse an RSA key (PKCS#1, then PKCS#8) into an rcgen signing key
fn rsa_signing_key(der: &[u8]) -> Result<KeyPair, StartupError> {
    let rsa_key = match RsaPrivateKey::from_pkcs1_der(der) {
        Ok(key) => key,
        Err(pkcs1_err) => {
            // A well-formed PKCS#8 container holding some other algorithm
            if let Ok(info) = rsa::pkcs8::PrivateKeyInfo::try_from(der) {
                if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
                    return Err(StartupError::KeyNotRsa);
                }
            }

            RsaPrivateKey::from_pkcs8_der(der).map_err(|pkcs8_err| {
                StartupError::KeyFormatError {
                    pkcs1: pkcs1_err.to_string(),
                    pkcs8: pkcs8_err.to_string(),
                }
            })?
        }
    };

    let pkcs8 = rsa_key
        .to_pkcs8_der()
        .map_err(|e| StartupError::SigningKeyRejected(e.to_string()))?;

    KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
        &rcgen::PKCS_RSA_SHA256,
    )
    .map_err(|e| StartupError::SigningKeyRejected(e.to_string()))
}

/// Check CA properties; returns the subject DN
fn validate_ca_certificate(cert_der: &CertificateDer<'_>) -> Result<String, StartupError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der.as_ref())
        .map_err(|e| StartupError::CaCertInvalid(format!("X.509 parse failed: {}", e)))?;

    // 1. basicConstraints
    match cert.basic_constraints().map_err(|e| {
        StartupError::CaCertInvalid(format!("Failed to read basicConstraints: {}", e))
    })? {
        Some(bc) if !bc.value.ca => {
            return Err(StartupError::CaCertInvalid(
                "Certificate is not a CA (basicConstraints.ca = false)".to_string(),
            ));
        }
        Some(_) => {}
        None => warn!("CA certificate missing basicConstraints extension"),
    }

    // 2. keyUsage
    match cert
        .key_usage()
        .map_err(|e| StartupError::CaCertInvalid(format!("Failed to read keyUsage: {}", e)))?
    {
        Some(ku) if !ku.value.key_cert_sign() => {
            return Err(StartupError::CaCertInvalid(
                "Certificate missing keyCertSign usage".to_string(),
            ));
        }
        Some(_) => {}
        None => warn!("CA certificate missing keyUsage extension"),
    }

    // 3. validity window
    let now = chrono::Utc::now().timestamp();
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Err(StartupError::CaCertInvalid(format!(
            "Certificate not yet valid (notBefore: {})",
            validity.not_before
        )));
    }
    if now > validity.not_after.timestamp() {
        return Err(StartupError::CaCertInvalid(format!(
            "Certificate expired (notAfter: {})",
            validity.not_after
        )));
    }

    Ok(cert.subject().to_string())
}
