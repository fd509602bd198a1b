//! Leaf Certificate Generator - Mints per-host certificates signed by the CA
//!
//! Each requested name gets a fresh key pair and a random 128-bit serial.
//! Names that parse as an IP address get an IP SAN; everything else gets a
//! DNS SAN. Validity starts slightly in the past (clock skew between proxy
//! and client) and ends `validity` after issuance.

use crate::mitm::ca_identity::CaIdentity;
use crate::mitm::error::{MitmError, Result};
use crate::mitm::issued::{CertificateOrigin, IssuedCertificate};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Organization written into every generated subject
pub const LEAF_ORGANIZATION: &str = "Egress Intercept";

/// Default leaf lifetime
pub const DEFAULT_LEAF_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default backdating of `not_before`
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

/// Serial number size (bits of entropy = 8 * this)
const SERIAL_LEN: usize = 16;

/// Host identifier for certificate generation
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum HostIdentifier {
    /// DNS-style name (including wildcards)
    Domain(String),

    /// Literal IP address
    IpAddress(IpAddr),
}

impl HostIdentifier {
    /// Classify a requested name
    pub fn from_name(name: &str) -> Self {
        match name.parse::<IpAddr>() {
            Ok(ip) => Self::IpAddress(ip),
            Err(_) => Self::Domain(name.to_string()),
        }
    }
}

/// Key algorithm for generated leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeafKeyAlgorithm {
    /// P-256, cheap to generate
    #[default]
    EcdsaP256,

    /// RSA 2048 for clients that cannot do ECDSA
    #[serde(rename = "rsa-2048")]
    Rsa2048,
}

/// Shape of generated leaves
#[derive(Debug, Clone)]
pub struct LeafProfile {
    pub key_algorithm: LeafKeyAlgorithm,
    pub validity: Duration,
    pub clock_skew: Duration,
}

impl Default for LeafProfile {
    fn default() -> Self {
        Self {
            key_algorithm: LeafKeyAlgorithm::default(),
            validity: DEFAULT_LEAF_VALIDITY,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

/// Signs new leaf certificates with a CA identity
#[derive(Debug)]
pub struct LeafGenerator {
    ca: Arc<CaIdentity>,
    profile: LeafProfile,
}

impl LeafGenerator {
    pub fn new(ca: Arc<CaIdentity>, profile: LeafProfile) -> Self {
        Self { ca, profile }
    }

    /// CA identity the leaves chain to
    pub fn ca(&self) -> &Arc<CaIdentity> {
        &self.ca
    }

    pub fn profile(&self) -> &LeafProfile {
        &self.profile
    }

    /// Generate a certificate for `name`, chained `[leaf, CA]`
    pub fn generate(&self, name: &str) -> Result<IssuedCertificate> {
        if name.is_empty() {
            return Err(MitmError::InvalidHost(name.to_string()));
        }

        let host = HostIdentifier::from_name(name);
        let mut params = CertificateParams::default();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, name);
        distinguished_name.push(DnType::OrganizationName, LEAF_ORGANIZATION);
        params.distinguished_name = distinguished_name;

        params.subject_alt_names = match host {
            HostIdentifier::IpAddress(ip) => vec![SanType::IpAddress(ip)],
            HostIdentifier::Domain(domain) => vec![SanType::DnsName(
                domain
                    .try_into()
                    .map_err(|_| MitmError::InvalidHost(name.to_string()))?,
            )],
        };

        let (not_before, not_after) =
            validity_window(time::OffsetDateTime::now_utc(), &self.profile).ok_or_else(|| {
                MitmError::cert_generation(name, "validity window out of range")
            })?;
        params.not_before = not_before;
        params.not_after = not_after;

        params.serial_number =
            Some(random_serial().map_err(|e| MitmError::cert_generation(name, e))?);

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;

        let key_pair = generate_key_pair(self.profile.key_algorithm)
            .map_err(|e| MitmError::cert_generation(name, e))?;

        let cert = params
            .signed_by(&key_pair, self.ca.issuer())
            .map_err(|e| MitmError::cert_generation(name, format!("signing failed: {}", e)))?;

        let chain = vec![cert.der().clone(), self.ca.certificate_der().clone()];
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let issued = IssuedCertificate::new(name, CertificateOrigin::Generated, chain, &key_der)
            .map_err(|e| MitmError::cert_generation(name, e))?;

        debug!(name = %name, algorithm = ?self.profile.key_algorithm, "Generated interception certificate");

        Ok(issued)
    }
}

/// `[now - clock_skew, now + validity]`, or `None` if either end is unrepresentable
fn validity_window(
    now: time::OffsetDateTime,
    profile: &LeafProfile,
) -> Option<(time::OffsetDateTime, time::OffsetDateTime)> {
    let skew = time::Duration::try_from(profile.clock_skew).ok()?;
    let validity = time::Duration::try_from(profile.validity).ok()?;
    Some((now.checked_sub(skew)?, now.checked_add(validity)?))
}

/// 128 random bits from the OS RNG
fn random_serial() -> std::result::Result<SerialNumber, rand::Error> {
    let mut bytes = [0u8; SERIAL_LEN];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(SerialNumber::from_slice(&bytes))
}

fn generate_key_pair(algorithm: LeafKeyAlgorithm) -> std::result::Result<KeyPair, String> {
    match algorithm {
        LeafKeyAlgorithm::EcdsaP256 => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(|e| e.to_string())
        }
        LeafKeyAlgorithm::Rsa2048 => {
            let rsa_key = rsa::RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| e.to_string())?;
            let pkcs8 = rsa_key.to_pkcs8_der().map_err(|e| e.to_string())?;
            KeyPair::from_pkcs8_der_and_sign_algo(
                &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
                &rcgen::PKCS_RSA_SHA256,
            )
            .map_err(|e| e.to_string())
        }
    }
}
