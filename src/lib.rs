//! Egress Intercept - TLS interception engine for an egress proxy
//!
//! Decides, per connection, whether a destination is intercepted and which
//! certificate to present when it is. Leaf certificates are minted on demand
//! and signed by a locally trusted CA, cached, and served from the rustls
//! certificate-selection hook. Domains that must present a fixed identity can
//! be given preconfigured certificates.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use egress_intercept::{ClientTlsConfig, InterceptConfig, InterceptManager};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InterceptConfig::from_file("intercept.yaml")?;
//!     let manager = Arc::new(InterceptManager::from_config(&config)?);
//!
//!     if manager.decide("example.com", None).is_intercept() {
//!         let tls = ClientTlsConfig::new(Arc::clone(&manager), config.tls_version)?;
//!         let _acceptor = tls.acceptor();
//!         // acceptor.accept(client_stream).await ...
//!     }
//!
//!     println!("{:?}", manager.stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `mitm` - interception engine: CA, policy, cache, generator, TLS adapter
//! - `config` - YAML and environment configuration

pub mod config;
pub mod mitm;

// Re-export commonly used types

/// Configuration types
pub use config::{ConfigError, InterceptConfig, PreconfiguredEntry};

/// Interception engine
pub use mitm::{
    CaIdentity, CertificateOrigin, ClientTlsConfig, GenerationLock, HostIdentifier,
    InterceptDecision, InterceptManager, InterceptMode, InterceptOptions, IssuedCertificate,
    LeafKeyAlgorithm, LeafProfile, MitmError, StartupError, StatsSnapshot, TlsConfigError,
    TlsVersion,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
