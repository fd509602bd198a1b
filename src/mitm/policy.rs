//! Interception Policy - decides whether a destination is intercepted
//!
//! Evaluation order is fixed:
//! 1. Global switch off → never intercept
//! 2. Exact domain override
//! 3. Exact IP override (only when an IP is supplied)
//! 4. Default: intercept
//!
//! Matches are exact string lookups; there is no wildcard or suffix matching.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PolicyState {
    enabled: bool,
    domains: HashMap<String, bool>,
    ips: HashMap<String, bool>,
}

/// Global switch plus per-domain and per-IP override tables
#[derive(Debug)]
pub struct InterceptPolicy {
    state: RwLock<PolicyState>,
}

impl InterceptPolicy {
    /// Create a policy with the given global switch and no overrides
    pub fn new(enabled: bool) -> Self {
        Self::with_overrides(enabled, HashMap::new(), HashMap::new())
    }

    /// Create a policy seeded with initial override tables
    pub fn with_overrides(
        enabled: bool,
        domains: HashMap<String, bool>,
        ips: HashMap<String, bool>,
    ) -> Self {
        Self {
            state: RwLock::new(PolicyState {
                enabled,
                domains,
                ips,
            }),
        }
    }

    /// Decide whether `name` (optionally reached at literal `ip`) is intercepted.
    /// An empty `ip` is treated as absent.
    pub fn should_intercept(&self, name: &str, ip: Option<&str>) -> bool {
        let state = self.state.read();

        if !state.enabled {
            return false;
        }

        if let Some(&intercept) = state.domains.get(name) {
            debug!(name = %name, intercept, "domain override matched");
            return intercept;
        }

        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            if let Some(&intercept) = state.ips.get(ip) {
                debug!(name = %name, ip = %ip, intercept, "IP override matched");
                return intercept;
            }
        }

        true
    }

    pub fn enable(&self) {
        self.state.write().enabled = true;
        info!("TLS interception enabled");
    }

    pub fn disable(&self) {
        self.state.write().enabled = false;
        info!("TLS interception disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// Set the override for an exact domain
    pub fn set_domain(&self, domain: impl Into<String>, intercept: bool) {
        let domain = domain.into();
        info!(domain = %domain, intercept, "domain override set");
        self.state.write().domains.insert(domain, intercept);
    }

    /// Remove a domain override. Returns true if one existed.
    pub fn clear_domain(&self, domain: &str) -> bool {
        self.state.write().domains.remove(domain).is_some()
    }

    /// Set the override for an exact IP address string
    pub fn set_ip(&self, ip: impl Into<String>, intercept: bool) {
        let ip = ip.into();
        info!(ip = %ip, intercept, "IP override set");
        self.state.write().ips.insert(ip, intercept);
    }

    /// Remove an IP override. Returns true if one existed.
    pub fn clear_ip(&self, ip: &str) -> bool {
        self.state.write().ips.remove(ip).is_some()
    }

    /// Copy of the domain override table
    pub fn domain_overrides(&self) -> HashMap<String, bool> {
        self.state.read().domains.clone()
    }

    /// Copy of the IP override table
    pub fn ip_overrides(&self) -> HashMap<String, bool> {
        self.state.read().ips.clone()
    }
}

impl Default for InterceptPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}
