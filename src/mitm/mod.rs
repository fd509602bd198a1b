//! MITM (Man-in-the-Middle) interception module
//!
//! This module provides the TLS interception engine for egress inspection.
//! It includes:
//! - CA identity loading and validation
//! - Per-destination interception policy (global switch, domain and IP overrides)
//! - Dynamic leaf certificate generation signed by the CA
//! - Preconfigured certificates for domains with a fixed identity
//! - LRU certificate cache with cumulative statistics
//! - Client-facing TLS configuration bound to the engine

pub mod ca_identity;
pub mod cert_cache;
pub mod certificate_authority;
pub mod error;
pub mod interceptor;
pub mod issued;
pub mod policy;
pub mod preconfigured;
pub mod source;
pub mod stats;
pub mod tls_config;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use ca_identity::CaIdentity;
pub use cert_cache::{CertCache, DEFAULT_CACHE_SIZE};
pub use certificate_authority::{HostIdentifier, LeafGenerator, LeafKeyAlgorithm, LeafProfile};
pub use error::{MitmError, StartupError};
pub use interceptor::{
    GenerationLock, InterceptDecision, InterceptManager, InterceptMode, InterceptOptions,
};
pub use issued::{CertificateOrigin, IssuedCertificate};
pub use policy::InterceptPolicy;
pub use preconfigured::PreconfiguredStore;
pub use source::CertificateSource;
pub use stats::{InterceptStats, StatsSnapshot};
pub use tls_config::{
    ClientTlsConfig, InterceptResolver, TlsConfigError, TlsVersion, ALLOWED_CIPHER_SUITES,
};
