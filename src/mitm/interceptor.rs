//! Interception engine
//!
//! Answers the two per-connection questions:
//! 1. Should this destination be intercepted? ([`InterceptManager::should_intercept`])
//! 2. Which certificate should be presented for this name?
//!    ([`InterceptManager::get_certificate`])
//!
//! Certificate resolution checks the cache, then walks the source chain
//! selected at construction (preconfigured store, then the leaf generator in
//! MITM mode). The engine is synchronous so it can be called straight from the
//! rustls certificate-selection hook.

use crate::config::InterceptConfig;
use crate::mitm::ca_identity::CaIdentity;
use crate::mitm::cert_cache::{CertCache, DEFAULT_CACHE_SIZE};
use crate::mitm::certificate_authority::{LeafGenerator, LeafProfile};
use crate::mitm::error::{MitmError, Result, StartupError};
use crate::mitm::issued::{CertificateOrigin, IssuedCertificate};
use crate::mitm::policy::InterceptPolicy;
use crate::mitm::preconfigured::PreconfiguredStore;
use crate::mitm::source::{resolve_chain, CertificateSource};
use crate::mitm::stats::{InterceptStats, StatsSnapshot};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operating mode, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterceptMode {
    /// Preconfigured certificates first, then on-demand generation
    #[default]
    Mitm,

    /// Only preconfigured certificates; unknown names fail
    Preconfigured,
}

impl std::fmt::Display for InterceptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Mitm => write!(f, "mitm"),
            Self::Preconfigured => write!(f, "preconfigured"),
        }
    }
}

/// How concurrent cache misses are serialised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationLock {
    /// The cache lock is held across resolution, generation included.
    /// First requests for distinct names queue behind one another.
    #[default]
    Global,

    /// Single-flight per name: one generation per name at a time, distinct
    /// names proceed in parallel
    PerName,
}

/// Outcome of [`InterceptManager::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptDecision {
    Intercept,
    Passthrough,
}

impl InterceptDecision {
    pub fn is_intercept(self) -> bool {
        self == Self::Intercept
    }
}

/// Engine tuning shared by every constructor
#[derive(Debug, Clone)]
pub struct InterceptOptions {
    pub enabled: bool,
    pub cache_size: usize,
    pub max_certificate_age: Option<Duration>,
    pub leaf_profile: LeafProfile,
    pub generation_lock: GenerationLock,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_size: DEFAULT_CACHE_SIZE,
            max_certificate_age: None,
            leaf_profile: LeafProfile::default(),
            generation_lock: GenerationLock::default(),
        }
    }
}

/// Per-connection interception decisions and certificate lifecycle.
///
/// Explicitly owned; share it with `Arc` between the listener and any
/// management surface.
pub struct InterceptManager {
    mode: InterceptMode,
    ca: Option<Arc<CaIdentity>>,
    policy: InterceptPolicy,
    preconfigured: Arc<PreconfiguredStore>,
    sources: Vec<Box<dyn CertificateSource>>,
    cache: Mutex<CertCache>,
    generation_lock: GenerationLock,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: InterceptStats,
}

impl InterceptManager {
    /// MITM mode with an already loaded CA
    pub fn mitm(ca: CaIdentity, options: InterceptOptions) -> Self {
        let ca = Arc::new(ca);
        info!(ca_subject = %ca.subject(), "TLS interception engine starting in MITM mode");
        Self::build(InterceptMode::Mitm, Some(ca), options)
    }

    /// MITM mode, loading the CA from PEM files
    pub fn with_ca_files(
        ca_cert_path: impl AsRef<Path>,
        ca_key_path: impl AsRef<Path>,
        options: InterceptOptions,
    ) -> std::result::Result<Self, StartupError> {
        let ca = CaIdentity::load(ca_cert_path, ca_key_path)?;
        Ok(Self::mitm(ca, options))
    }

    /// Preconfigured-only mode; no CA is loaded and nothing is generated
    pub fn preconfigured_only(options: InterceptOptions) -> Self {
        info!("TLS interception engine starting in preconfigured-only mode");
        Self::build(InterceptMode::Preconfigured, None, options)
    }

    /// Engine that never intercepts, for running without CA material
    pub fn passthrough_only() -> Self {
        Self::preconfigured_only(InterceptOptions {
            enabled: false,
            ..InterceptOptions::default()
        })
    }

    /// Build from configuration: loads the CA (MITM mode, interception
    /// enabled), seeds the override tables and loads every preconfigured entry.
    /// A disabled MITM configuration skips the CA so pass-through operation
    /// needs no CA material; enabling it later serves preconfigured names only.
    pub fn from_config(config: &InterceptConfig) -> std::result::Result<Self, StartupError> {
        let options = InterceptOptions {
            enabled: config.enabled,
            cache_size: config.cert_cache_size,
            max_certificate_age: config.max_certificate_age(),
            leaf_profile: config.leaf_profile(),
            generation_lock: config.generation_lock,
        };

        let manager = match config.mode {
            InterceptMode::Mitm if !config.enabled => {
                warn!("interception disabled at startup; CA not loaded, no certificates will be generated");
                Self::build(InterceptMode::Mitm, None, options)
            }
            InterceptMode::Mitm => {
                Self::with_ca_files(&config.ca_cert_path, &config.ca_key_path, options)?
            }
            InterceptMode::Preconfigured => Self::preconfigured_only(options),
        };

        for (domain, &intercept) in &config.domain_overrides {
            manager.policy.set_domain(domain.clone(), intercept);
        }
        for (ip, &intercept) in &config.ip_overrides {
            manager.policy.set_ip(ip.clone(), intercept);
        }
        for entry in &config.preconfigured {
            manager.load_preconfigured_cert(&entry.domain, &entry.cert_path, &entry.key_path)?;
        }

        Ok(manager)
    }

    fn build(mode: InterceptMode, ca: Option<Arc<CaIdentity>>, options: InterceptOptions) -> Self {
        let preconfigured = Arc::new(PreconfiguredStore::new());

        let mut sources: Vec<Box<dyn CertificateSource>> =
            vec![Box::new(Arc::clone(&preconfigured))];
        if let (InterceptMode::Mitm, Some(ca)) = (mode, &ca) {
            sources.push(Box::new(LeafGenerator::new(
                Arc::clone(ca),
                options.leaf_profile.clone(),
            )));
        }

        Self {
            mode,
            ca,
            policy: InterceptPolicy::new(options.enabled),
            preconfigured,
            sources,
            cache: Mutex::new(CertCache::with_max_age(
                options.cache_size,
                options.max_certificate_age,
            )),
            generation_lock: options.generation_lock,
            flights: Mutex::new(HashMap::new()),
            stats: InterceptStats::new(),
        }
    }

    // ---- interception decision ----

    /// Pure policy evaluation; see [`InterceptPolicy::should_intercept`]
    pub fn should_intercept(&self, name: &str, ip: Option<&str>) -> bool {
        self.policy.should_intercept(name, ip)
    }

    /// Evaluate the policy and count the connection as intercepted or passed through
    pub fn decide(&self, name: &str, ip: Option<&str>) -> InterceptDecision {
        if self.should_intercept(name, ip) {
            self.stats.record_intercepted();
            debug!(name = %name, ip = ?ip, "intercepting");
            InterceptDecision::Intercept
        } else {
            self.stats.record_passthrough();
            debug!(name = %name, ip = ?ip, "passing through");
            InterceptDecision::Passthrough
        }
    }

    // ---- certificate resolution ----

    /// Resolve the certificate to present for `name` (SNI or literal IP).
    ///
    /// Cache → preconfigured → generator (MITM mode only). Repeated calls
    /// return the same `Arc` until the entry is evicted or the cache cleared.
    pub fn get_certificate(&self, name: &str) -> Result<Arc<IssuedCertificate>> {
        if name.is_empty() {
            return Err(MitmError::InvalidHost(name.to_string()));
        }

        match self.generation_lock {
            GenerationLock::Global => {
                let mut cache = self.cache.lock();
                if let Some(hit) = self.cache_hit(&mut cache, name) {
                    return Ok(hit);
                }
                self.stats.record_miss();
                let (issued, source) = self.resolve(name)?;
                Ok(self.finish(&mut cache, name, issued, source))
            }
            GenerationLock::PerName => {
                if let Some(hit) = self.cache_hit(&mut self.cache.lock(), name) {
                    return Ok(hit);
                }

                let flight = self.flight_for(name);
                let _in_flight = flight.lock();

                // Another flight may have finished while we waited
                if let Some(hit) = self.cache_hit(&mut self.cache.lock(), name) {
                    return Ok(hit);
                }
                self.stats.record_miss();

                // Resolve without the cache lock; publish before retiring the flight
                let result = self.resolve(name).map(|(issued, source)| {
                    let mut cache = self.cache.lock();
                    self.finish(&mut cache, name, issued, source)
                });
                self.retire_flight(name, &flight);
                result
            }
        }
    }

    fn cache_hit(&self, cache: &mut CertCache, name: &str) -> Option<Arc<IssuedCertificate>> {
        let hit = cache.get(name)?;
        self.stats.record_hit();
        debug!(name = %name, "certificate cache hit");
        Some(hit)
    }

    fn resolve(&self, name: &str) -> Result<(Arc<IssuedCertificate>, &'static str)> {
        resolve_chain(&self.sources, name)?
            .ok_or_else(|| MitmError::NoCertificate(name.to_string()))
    }

    fn finish(
        &self,
        cache: &mut CertCache,
        name: &str,
        issued: Arc<IssuedCertificate>,
        source: &'static str,
    ) -> Arc<IssuedCertificate> {
        if issued.origin() == CertificateOrigin::Generated {
            self.stats.record_generated();
        }
        if let Some(evicted) = cache.insert(name.to_string(), Arc::clone(&issued)) {
            debug!(evicted = %evicted, "certificate evicted from cache");
        }
        debug!(name = %name, source, "certificate resolved");
        issued
    }

    fn flight_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock();
        Arc::clone(flights.entry(name.to_string()).or_default())
    }

    /// Drop the flight for `name` unless a newer one has replaced it
    fn retire_flight(&self, name: &str, flight: &Arc<Mutex<()>>) {
        let mut flights = self.flights.lock();
        if flights.get(name).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            flights.remove(name);
        }
    }

    // ---- runtime administration ----

    pub fn enable(&self) {
        self.policy.enable();
    }

    pub fn disable(&self) {
        self.policy.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.is_enabled()
    }

    pub fn set_domain_intercept(&self, domain: impl Into<String>, intercept: bool) {
        self.policy.set_domain(domain, intercept);
    }

    pub fn clear_domain_intercept(&self, domain: &str) -> bool {
        self.policy.clear_domain(domain)
    }

    pub fn set_ip_intercept(&self, ip: impl Into<String>, intercept: bool) {
        self.policy.set_ip(ip, intercept);
    }

    pub fn clear_ip_intercept(&self, ip: &str) -> bool {
        self.policy.clear_ip(ip)
    }

    /// Copy of the per-domain override table
    pub fn domain_overrides(&self) -> HashMap<String, bool> {
        self.policy.domain_overrides()
    }

    /// Copy of the per-IP override table
    pub fn ip_overrides(&self) -> HashMap<String, bool> {
        self.policy.ip_overrides()
    }

    /// Drop every cached certificate. Counters are left untouched.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "certificate cache cleared");
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn record_intercepted(&self) {
        self.stats.record_intercepted();
    }

    pub fn record_passthrough(&self) {
        self.stats.record_passthrough();
    }

    pub fn mode(&self) -> InterceptMode {
        self.mode
    }

    /// CA certificate PEM for distribution to clients (MITM mode only)
    pub fn ca_certificate_pem(&self) -> Option<&str> {
        self.ca.as_deref().map(CaIdentity::certificate_pem)
    }

    /// Register PEM chain and key for `domain`. A cached certificate for the
    /// same name is dropped so the new one is served next.
    pub fn add_preconfigured_cert(
        &self,
        domain: &str,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> std::result::Result<(), StartupError> {
        self.preconfigured.insert_pem(domain, cert_pem, key_pem)?;
        self.cache.lock().remove(domain);
        Ok(())
    }

    /// Load PEM chain and key files for `domain`
    pub fn load_preconfigured_cert(
        &self,
        domain: &str,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> std::result::Result<(), StartupError> {
        self.preconfigured
            .load_from_files(domain, cert_path, key_path)?;
        self.cache.lock().remove(domain);
        Ok(())
    }

    pub fn preconfigured_domains(&self) -> Vec<String> {
        self.preconfigured.domains()
    }
}

impl std::fmt::Debug for InterceptManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptManager")
            .field("mode", &self.mode)
            .field("enabled", &self.policy.is_enabled())
            .field("generation_lock", &self.generation_lock)
            .field("preconfigured", &self.preconfigured.len())
            .field("cache_len", &self.cache_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitm::test_support::{self_signed_leaf, verify_chain, TestCa};
    use std::collections::HashSet;
    use std::sync::mpsc;
    use x509_parser::extensions::GeneralName;
    use x509_parser::parse_x509_certificate;

    fn mitm_manager(options: InterceptOptions) -> InterceptManager {
        InterceptManager::mitm(TestCa::shared().identity(), options)
    }

    fn common_name(issued: &IssuedCertificate) -> String {
        let (_, cert) = parse_x509_certificate(issued.leaf_der()).unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap()
            .to_string();
        cn
    }

    #[test]
    fn test_get_certificate_twice_hits_cache() {
        let manager = mitm_manager(InterceptOptions::default());

        let first = manager.get_certificate("example.com").unwrap();
        let after_first = manager.stats();
        assert_eq!(after_first.cache_misses, 1);
        assert_eq!(after_first.certificates_generated, 1);
        assert_eq!(after_first.cache_hits, 0);

        let second = manager.get_certificate("example.com").unwrap();
        let after_second = manager.stats();
        assert_eq!(after_second.cache_hits, 1);
        assert_eq!(after_second.cache_misses, 1);
        assert_eq!(after_second.certificates_generated, 1);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(common_name(&first), "example.com");
        assert_eq!(common_name(&second), "example.com");
    }

    #[test]
    fn test_generated_certificate_chains_to_ca() {
        let manager = mitm_manager(InterceptOptions::default());
        let issued = manager.get_certificate("chain.example").unwrap();

        assert_eq!(issued.origin(), CertificateOrigin::Generated);
        assert_eq!(issued.chain().len(), 2);
        let ca_der = TestCa::shared().identity().certificate_der().clone();
        verify_chain(issued.chain(), &ca_der, "chain.example").unwrap();
    }

    #[test]
    fn test_ip_destination_gets_ip_san() {
        let manager = mitm_manager(InterceptOptions::default());
        let issued = manager.get_certificate("203.0.113.7").unwrap();

        let (_, cert) = parse_x509_certificate(issued.leaf_der()).unwrap();
        let san = cert.subject_alternative_name().unwrap().unwrap();
        assert!(san.value.general_names.iter().any(|gn| matches!(
            gn,
            GeneralName::IPAddress(bytes) if **bytes == [203, 0, 113, 7]
        )));
        assert!(!san
            .value
            .general_names
            .iter()
            .any(|gn| matches!(gn, GeneralName::DNSName(_))));
    }

    #[test]
    fn test_clear_cache_regenerates_and_keeps_counters() {
        let manager = mitm_manager(InterceptOptions::default());
        let first = manager.get_certificate("purge.example").unwrap();
        assert_eq!(manager.cache_len(), 1);

        manager.clear_cache();
        assert_eq!(manager.cache_len(), 0);
        assert_eq!(manager.stats().certificates_generated, 1);

        let second = manager.get_certificate("purge.example").unwrap();
        let stats = manager.stats();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.certificates_generated, 2);
        assert_eq!(stats.cache_hits, 0);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_preconfigured_takes_precedence_and_is_cached() {
        let manager = mitm_manager(InterceptOptions::default());
        let leaf = self_signed_leaf("pinned.example");
        manager
            .add_preconfigured_cert(
                "pinned.example",
                leaf.cert_pem.as_bytes(),
                leaf.key_pem.as_bytes(),
            )
            .unwrap();

        let first = manager.get_certificate("pinned.example").unwrap();
        assert_eq!(first.origin(), CertificateOrigin::Preconfigured);
        assert_eq!(manager.stats().certificates_generated, 0);
        assert_eq!(manager.cache_len(), 1);

        let second = manager.get_certificate("pinned.example").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.stats().cache_hits, 1);
    }

    #[test]
    fn test_adding_preconfigured_replaces_cached_leaf() {
        let manager = mitm_manager(InterceptOptions::default());
        let generated = manager.get_certificate("late.example").unwrap();
        assert_eq!(generated.origin(), CertificateOrigin::Generated);

        let leaf = self_signed_leaf("late.example");
        manager
            .add_preconfigured_cert("late.example", leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes())
            .unwrap();

        let served = manager.get_certificate("late.example").unwrap();
        assert_eq!(served.origin(), CertificateOrigin::Preconfigured);
    }

    #[test]
    fn test_preconfigured_only_never_generates() {
        let manager = InterceptManager::preconfigured_only(InterceptOptions::default());
        assert_eq!(manager.mode(), InterceptMode::Preconfigured);
        assert!(manager.ca_certificate_pem().is_none());

        let err = manager.get_certificate("unknown.example").unwrap_err();
        assert!(matches!(err, MitmError::NoCertificate(ref n) if n == "unknown.example"));
        assert_eq!(manager.stats().certificates_generated, 0);
        assert_eq!(manager.cache_len(), 0);

        let leaf = self_signed_leaf("known.example");
        manager
            .add_preconfigured_cert("known.example", leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes())
            .unwrap();
        assert!(manager.get_certificate("known.example").is_ok());
    }

    #[test]
    fn test_empty_name_is_invalid_host() {
        let manager = mitm_manager(InterceptOptions::default());
        assert!(matches!(
            manager.get_certificate(""),
            Err(MitmError::InvalidHost(_))
        ));
        assert_eq!(manager.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_unreadable_ca_is_startup_error() {
        let result = InterceptManager::with_ca_files(
            "/nonexistent/ca.crt",
            "/nonexistent/ca.key",
            InterceptOptions::default(),
        );
        assert!(matches!(result, Err(StartupError::CaCertUnreadable { .. })));
    }

    #[test]
    fn test_policy_scenario() {
        let manager = mitm_manager(InterceptOptions::default());
        assert!(manager.should_intercept("anything.example", Some("")));

        manager.set_domain_intercept("anything.example", false);
        assert!(!manager.should_intercept("anything.example", Some("")));

        manager.set_domain_intercept("anything.example", true);
        assert!(manager.should_intercept("anything.example", Some("")));

        manager.disable();
        assert!(!manager.is_enabled());
        assert!(!manager.should_intercept("anything.example", Some("")));
    }

    #[test]
    fn test_override_copies_and_clear() {
        let manager = mitm_manager(InterceptOptions::default());
        manager.set_domain_intercept("a.example", false);
        manager.set_ip_intercept("192.0.2.1", false);

        let mut domains = manager.domain_overrides();
        domains.clear();
        assert_eq!(manager.domain_overrides().len(), 1);
        assert_eq!(manager.ip_overrides().get("192.0.2.1"), Some(&false));

        assert!(manager.clear_domain_intercept("a.example"));
        assert!(manager.clear_ip_intercept("192.0.2.1"));
        assert!(manager.domain_overrides().is_empty());
        assert!(manager.ip_overrides().is_empty());
    }

    #[test]
    fn test_decide_records_connection_counters() {
        let manager = mitm_manager(InterceptOptions::default());
        manager.set_domain_intercept("skip.example", false);

        assert!(manager.decide("inspect.example", None).is_intercept());
        assert_eq!(
            manager.decide("skip.example", None),
            InterceptDecision::Passthrough
        );
        manager.record_passthrough();

        let stats = manager.stats();
        assert_eq!(stats.intercepted_connections, 1);
        assert_eq!(stats.passthrough_connections, 2);
    }

    #[test]
    fn test_passthrough_only() {
        let manager = InterceptManager::passthrough_only();
        assert!(!manager.is_enabled());
        assert_eq!(
            manager.decide("any.example", Some("192.0.2.9")),
            InterceptDecision::Passthrough
        );
    }

    #[test]
    fn test_lru_capacity_respected() {
        let manager = mitm_manager(InterceptOptions {
            cache_size: 2,
            ..InterceptOptions::default()
        });
        manager.get_certificate("one.example").unwrap();
        manager.get_certificate("two.example").unwrap();
        manager.get_certificate("three.example").unwrap();

        assert_eq!(manager.cache_len(), 2);
        assert_eq!(manager.cache_capacity(), 2);

        // one.example was evicted and must be regenerated
        manager.get_certificate("one.example").unwrap();
        assert_eq!(manager.stats().certificates_generated, 4);
    }

    #[test]
    fn test_max_age_turns_stale_hit_into_miss() {
        let manager = mitm_manager(InterceptOptions {
            max_certificate_age: Some(Duration::from_millis(20)),
            ..InterceptOptions::default()
        });
        let first = manager.get_certificate("aging.example").unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let second = manager.get_certificate("aging.example").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.stats().cache_misses, 2);
        assert_eq!(manager.stats().certificates_generated, 2);
    }

    fn concurrent_first_requests(lock: GenerationLock) -> (Vec<Arc<IssuedCertificate>>, StatsSnapshot) {
        let manager = Arc::new(mitm_manager(InterceptOptions {
            generation_lock: lock,
            ..InterceptOptions::default()
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.get_certificate("burst.example").unwrap())
            })
            .collect();
        let certs = handles.into_iter().map(|h| h.join().unwrap()).collect();
        (certs, manager.stats())
    }

    #[test]
    fn test_concurrent_same_name_generates_once() {
        for lock in [GenerationLock::Global, GenerationLock::PerName] {
            let (certs, stats) = concurrent_first_requests(lock);

            assert_eq!(stats.certificates_generated, 1, "{lock:?}");
            assert_eq!(stats.cache_misses, 1, "{lock:?}");
            assert_eq!(stats.cache_hits, 7, "{lock:?}");
            assert!(certs.iter().all(|c| Arc::ptr_eq(c, &certs[0])));
        }
    }

    #[test]
    fn test_per_name_distinct_names() {
        let manager = Arc::new(mitm_manager(InterceptOptions {
            generation_lock: GenerationLock::PerName,
            ..InterceptOptions::default()
        }));
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    manager
                        .get_certificate(&format!("host{i}.example"))
                        .unwrap()
                        .name()
                        .to_string()
                })
            })
            .collect();
        let names: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(names.len(), 6);
        assert_eq!(manager.stats().certificates_generated, 6);
        assert_eq!(manager.cache_len(), 6);
        assert!(manager.flights.lock().is_empty());
    }

    /// Source that parks lookups for `slow.example` until released
    struct GatedSource {
        store: PreconfiguredStore,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl CertificateSource for GatedSource {
        fn label(&self) -> &'static str {
            "gated"
        }

        fn lookup(&self, name: &str) -> Result<Option<Arc<IssuedCertificate>>> {
            if name == "slow.example" {
                self.entered.lock().send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
            self.store.lookup(name)
        }
    }

    #[test]
    fn test_per_name_resolves_outside_cache_lock() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = PreconfiguredStore::new();
        for name in ["slow.example", "fast.example"] {
            let leaf = self_signed_leaf(name);
            store
                .insert_pem(name, leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes())
                .unwrap();
        }

        let mut manager = InterceptManager::preconfigured_only(InterceptOptions {
            generation_lock: GenerationLock::PerName,
            ..InterceptOptions::default()
        });
        manager.sources = vec![Box::new(GatedSource {
            store,
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        })];
        let manager = Arc::new(manager);

        let slow = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.get_certificate("slow.example").unwrap())
        };
        entered_rx.recv().unwrap();

        // slow.example is mid-resolution: the cache stays free for other names
        assert!(manager.cache.try_lock().is_some());
        let fast = manager.get_certificate("fast.example").unwrap();
        assert_eq!(fast.name(), "fast.example");

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap().name(), "slow.example");
        assert_eq!(manager.cache_len(), 2);
        assert_eq!(manager.stats().cache_misses, 2);
    }

    #[test]
    fn test_retiring_stale_flight_keeps_newer_one() {
        let manager = mitm_manager(InterceptOptions {
            generation_lock: GenerationLock::PerName,
            ..InterceptOptions::default()
        });

        let stale = manager.flight_for("x.example");
        manager.retire_flight("x.example", &stale);
        let current = manager.flight_for("x.example");
        assert!(!Arc::ptr_eq(&stale, &current));

        manager.retire_flight("x.example", &stale);
        assert!(manager.flights.lock().contains_key("x.example"));

        manager.retire_flight("x.example", &current);
        assert!(manager.flights.lock().is_empty());
    }

    #[test]
    fn test_failed_flight_is_retired() {
        let manager = InterceptManager::preconfigured_only(InterceptOptions {
            generation_lock: GenerationLock::PerName,
            ..InterceptOptions::default()
        });

        assert!(matches!(
            manager.get_certificate("missing.example"),
            Err(MitmError::NoCertificate(_))
        ));
        assert!(manager.flights.lock().is_empty());
        assert_eq!(manager.cache_len(), 0);
    }

    #[test]
    fn test_ca_certificate_pem_exposed_in_mitm_mode() {
        let manager = mitm_manager(InterceptOptions::default());
        let pem = manager.ca_certificate_pem().unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(manager.mode(), InterceptMode::Mitm);
    }
}
