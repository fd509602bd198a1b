//! TLS Configuration - Hardened client-facing TLS for interception
//!
//! The proxy terminates the client's TLS with a certificate chosen per
//! handshake by [`InterceptResolver`], which delegates to
//! [`InterceptManager::get_certificate`]. No caching or policy lives here.
//!
//! ## Security Hardening
//!
//! - TLS 1.2 and 1.3 only (no TLS 1.0/1.1)
//! - AEAD cipher suites only (no CBC)
//! - ALPN negotiation (h2, http/1.1)

use crate::mitm::interceptor::InterceptManager;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::version::{TLS12, TLS13};
use rustls::{CipherSuite, ServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// TLS configuration errors
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("TLS configuration error: {0}")]
    ConfigError(String),

    #[error("No supported cipher suites")]
    NoCipherSuites,
}

/// TLS version preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsVersion {
    /// TLS 1.2 and 1.3
    #[default]
    Tls12And13,
    /// TLS 1.3 only (most secure)
    Tls13Only,
}

static TLS12_AND_13: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&TLS13];

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            Self::Tls12And13 => TLS12_AND_13,
            Self::Tls13Only => TLS13_ONLY,
        }
    }
}

/// Cipher suites offered to clients, in preference order
pub const ALLOWED_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

/// ring provider restricted to [`ALLOWED_CIPHER_SUITES`]
fn hardened_provider() -> Result<Arc<CryptoProvider>, TlsConfigError> {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites = ALLOWED_CIPHER_SUITES
        .iter()
        .filter_map(|wanted| {
            provider
                .cipher_suites
                .iter()
                .find(|suite| suite.suite() == *wanted)
                .copied()
        })
        .collect();

    if provider.cipher_suites.is_empty() {
        return Err(TlsConfigError::NoCipherSuites);
    }
    Ok(Arc::new(provider))
}

/// Certificate-selection hook bound to the interception engine
#[derive(Debug)]
pub struct InterceptResolver {
    manager: Arc<InterceptManager>,
    /// Used when the client sends no SNI (IP-addressed destinations)
    fallback_name: Option<String>,
}

impl InterceptResolver {
    pub fn new(manager: Arc<InterceptManager>, fallback_name: Option<String>) -> Self {
        Self {
            manager,
            fallback_name,
        }
    }

    fn requested_name<'a>(&'a self, client_hello: &'a ClientHello<'_>) -> Option<&'a str> {
        client_hello
            .server_name()
            .or(self.fallback_name.as_deref())
    }
}

impl ResolvesServerCert for InterceptResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = self.requested_name(&client_hello) else {
            warn!("client sent no SNI and no destination hint is set");
            return None;
        };

        match self.manager.get_certificate(name) {
            Ok(issued) => {
                debug!(name = %name, origin = ?issued.origin(), "presenting certificate");
                Some(issued.certified_key())
            }
            Err(e) => {
                warn!(name = %name, error = %e, "certificate resolution failed");
                None
            }
        }
    }
}

/// Client-facing TLS config (proxy acts as server with an intercept certificate)
pub struct ClientTlsConfig {
    manager: Arc<InterceptManager>,
    tls_version: TlsVersion,
    provider: Arc<CryptoProvider>,
    config: Arc<ServerConfig>,
}

impl ClientTlsConfig {
    /// Build the hardened server config bound to `manager`
    pub fn new(
        manager: Arc<InterceptManager>,
        tls_version: TlsVersion,
    ) -> Result<Self, TlsConfigError> {
        let provider = hardened_provider()?;
        let config = build_server_config(
            Arc::clone(&provider),
            tls_version,
            InterceptResolver::new(Arc::clone(&manager), None),
        )?;

        info!(
            tls_version = ?tls_version,
            cipher_suites = provider.cipher_suites.len(),
            alpn = ?config.alpn_protocols,
            "Client-facing TLS config created"
        );

        Ok(Self {
            manager,
            tls_version,
            provider,
            config,
        })
    }

    /// Shared config that selects certificates by SNI only
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    /// Config for one connection whose literal destination (usually the IP
    /// string) is used when the client sends no SNI
    pub fn server_config_for_destination(
        &self,
        destination: &str,
    ) -> Result<Arc<ServerConfig>, TlsConfigError> {
        build_server_config(
            Arc::clone(&self.provider),
            self.tls_version,
            InterceptResolver::new(Arc::clone(&self.manager), Some(destination.to_string())),
        )
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }

    pub fn acceptor_for_destination(
        &self,
        destination: &str,
    ) -> Result<TlsAcceptor, TlsConfigError> {
        self.server_config_for_destination(destination)
            .map(TlsAcceptor::from)
    }

    pub fn tls_version(&self) -> TlsVersion {
        self.tls_version
    }
}

fn build_server_config(
    provider: Arc<CryptoProvider>,
    tls_version: TlsVersion,
    resolver: InterceptResolver,
) -> Result<Arc<ServerConfig>, TlsConfigError> {
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(tls_version.protocol_versions())
        .map_err(|e| TlsConfigError::ConfigError(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));

    // Advertise both h2 and http/1.1 for ALPN negotiation
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
