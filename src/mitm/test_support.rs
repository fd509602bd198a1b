//! Shared fixtures for unit tests: a process-wide RSA test CA and helpers
//! for chain verification.

use crate::mitm::ca_identity::CaIdentity;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::RootCertStore;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

pub(crate) struct TestCa {
    pub cert_pem: String,
    pub pkcs1_key_pem: String,
    pub pkcs8_key_pem: String,
}

impl TestCa {
    /// 2048-bit RSA keygen is slow; every test shares one CA
    pub fn shared() -> &'static TestCa {
        static CA: OnceLock<TestCa> = OnceLock::new();
        CA.get_or_init(TestCa::generate)
    }

    fn generate() -> Self {
        let rsa_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pkcs1_key_pem = rsa_key.to_pkcs1_pem(LineEnding::LF).unwrap().as_str().to_string();
        let pkcs8_key_pem = rsa_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_str().to_string();
        let pkcs8_der = rsa_key.to_pkcs8_der().unwrap();

        let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(pkcs8_der.as_bytes()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .unwrap();

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "Test Intercept CA");
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(30);

        let cert = params.self_signed(&key_pair).unwrap();

        Self {
            cert_pem: cert.pem(),
            pkcs1_key_pem,
            pkcs8_key_pem,
        }
    }

    pub fn identity(&self) -> CaIdentity {
        CaIdentity::from_pem(&self.cert_pem, &SecretString::new(self.pkcs1_key_pem.clone()))
            .unwrap()
    }

    pub fn write_to(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let cert_path = dir.join("ca.crt");
        let key_path = dir.join("ca.key");
        std::fs::write(&cert_path, &self.cert_pem).unwrap();
        std::fs::write(&key_path, &self.pkcs1_key_pem).unwrap();
        (cert_path, key_path)
    }
}

pub(crate) struct LeafPem {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Self-signed end-entity certificate (explicitly not a CA)
pub(crate) fn self_signed_leaf(name: &str) -> LeafPem {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.is_ca = IsCa::ExplicitNoCa;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = params.self_signed(&key_pair).unwrap();
    LeafPem {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    }
}

/// Verify `chain` (leaf first) as a server certificate for `name` under `ca_der`
pub(crate) fn verify_chain(
    chain: &[CertificateDer<'static>],
    ca_der: &CertificateDer<'static>,
    name: &str,
) -> Result<(), rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.add(ca_der.clone())?;

    let verifier = WebPkiServerVerifier::builder_with_provider(
        Arc::new(roots),
        Arc::new(rustls::crypto::ring::default_provider()),
    )
    .build()
    .map_err(|e| rustls::Error::General(e.to_string()))?;

    let server_name = ServerName::try_from(name.to_string())
        .map_err(|e| rustls::Error::General(e.to_string()))?;

    verifier
        .verify_server_cert(&chain[0], &chain[1..], &server_name, &[], UnixTime::now())
        .map(|_| ())
}
