//! Shared fixtures for integration tests

#![allow(dead_code)]

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct TestCa {
    pub cert_pem: String,
    pub cert_der: CertificateDer<'static>,
    pub pkcs1_key_pem: String,
    pub pkcs8_key_pem: String,
}

/// 2048-bit RSA CA shared by every test in the binary
pub fn test_ca() -> &'static TestCa {
    static CA: OnceLock<TestCa> = OnceLock::new();
    CA.get_or_init(|| {
        let rsa_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
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
            .push(DnType::CommonName, "Integration Test CA");
        // Same shape as the unit-test CA in src/mitm/test_support.rs
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(30);
        let cert = params.self_signed(&key_pair).unwrap();

        TestCa {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            pkcs1_key_pem: rsa_key.to_pkcs1_pem(LineEnding::LF).unwrap().as_str().to_string(),
            pkcs8_key_pem: rsa_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_str().to_string(),
        }
    })
}

/// Write the CA to `dir` as `ca.crt` / `ca.key` (PKCS#1)
pub fn write_ca(dir: &Path) -> (PathBuf, PathBuf) {
    let ca = test_ca();
    let cert_path = dir.join("ca.crt");
    let key_path = dir.join("ca.key");
    std::fs::write(&cert_path, &ca.cert_pem).unwrap();
    std::fs::write(&key_path, &ca.pkcs1_key_pem).unwrap();
    (cert_path, key_path)
}

/// Self-signed ECDSA leaf for `name`, written to `dir`
pub fn write_leaf(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.is_ca = IsCa::ExplicitNoCa;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = params.self_signed(&key_pair).unwrap();

    let cert_path = dir.join(format!("{name}.crt"));
    let key_path = dir.join(format!("{name}.key"));
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// Subject CN of a DER certificate
pub fn common_name(der: &[u8]) -> String {
    let (_, cert) = x509_parser::parse_x509_certificate(der).unwrap();
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap()
        .to_string();
    cn
}
