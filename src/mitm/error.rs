//! Interception error types
//!
//! Two families, split by blast radius:
//! - [`StartupError`]: CA / preconfigured material could not be loaded. Fatal to
//!   engine construction; callers treat it as a startup failure.
//! - [`MitmError`]: certificate resolution failed for one handshake. Returned
//!   to the caller of `get_certificate`; never retried internally.

use thiserror::Error;

/// Result type for per-connection interception operations
pub type Result<T> = std::result::Result<T, MitmError>;

/// Errors raised while loading CA or preconfigured certificate material
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("CA certificate unreadable ({path}): {source}")]
    CaCertUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CA private key unreadable ({path}): {source}")]
    CaKeyUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CA certificate invalid: {0}")]
    CaCertInvalid(String),

    #[error("failed to decode CA private key PEM")]
    KeyPemInvalid,

    #[error("failed to parse CA private key: PKCS#1 error: {pkcs1}, PKCS#8 error: {pkcs8}")]
    KeyFormatError { pkcs1: String, pkcs8: String },

    #[error("CA private key is not RSA")]
    KeyNotRsa,

    #[error("CA signing key rejected: {0}")]
    SigningKeyRejected(String),

    #[error("failed to load certificate for {domain}: {reason}")]
    PreconfiguredCertInvalid { domain: String, reason: String },
}

impl StartupError {
    /// Create a preconfigured-certificate error
    pub fn preconfigured(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreconfiguredCertInvalid {
            domain: domain.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while resolving a certificate for a single handshake
#[derive(Debug, Error)]
pub enum MitmError {
    /// Key synthesis, serial generation or signing failed
    #[error("failed to generate certificate for {name}: {reason}")]
    CertGenerationFailed { name: String, reason: String },

    /// Preconfigured-only mode and no entry matches
    #[error("no certificate available for {0}")]
    NoCertificate(String),

    /// The requested name cannot be used as a subject
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
}

impl MitmError {
    /// Create a certificate generation error
    pub fn cert_generation(name: impl Into<String>, msg: impl ToString) -> Self {
        Self::CertGenerationFailed {
            name: name.into(),
            reason: msg.to_string(),
        }
    }

    /// Whether this failure was raised by the generator (as opposed to a lookup miss)
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, Self::CertGenerationFailed { .. })
    }
}
