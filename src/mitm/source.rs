//! Certificate sources consulted after the cache, in order
//!
//! A source either answers for a name, declines (`Ok(None)`) so the next
//! source is tried, or fails the lookup outright.

use crate::mitm::certificate_authority::LeafGenerator;
use crate::mitm::error::Result;
use crate::mitm::issued::IssuedCertificate;
use crate::mitm::preconfigured::PreconfiguredStore;
use std::sync::Arc;

pub trait CertificateSource: Send + Sync {
    /// Short label for logs
    fn label(&self) -> &'static str;

    fn lookup(&self, name: &str) -> Result<Option<Arc<IssuedCertificate>>>;
}

impl<T: CertificateSource + ?Sized> CertificateSource for Arc<T> {
    fn label(&self) -> &'static str {
        (**self).label()
    }

    fn lookup(&self, name: &str) -> Result<Option<Arc<IssuedCertificate>>> {
        (**self).lookup(name)
    }
}

impl CertificateSource for PreconfiguredStore {
    fn label(&self) -> &'static str {
        "preconfigured"
    }

    fn lookup(&self, name: &str) -> Result<Option<Arc<IssuedCertificate>>> {
        Ok(self.get(name))
    }
}

impl CertificateSource for LeafGenerator {
    fn label(&self) -> &'static str {
        "generated"
    }

    /// Always answers: either a fresh leaf or a generation error
    fn lookup(&self, name: &str) -> Result<Option<Arc<IssuedCertificate>>> {
        self.generate(name).map(|issued| Some(Arc::new(issued)))
    }
}

/// Walk `sources` in order, returning the first answer
pub(crate) fn resolve_chain(
    sources: &[Box<dyn CertificateSource>],
    name: &str,
) -> Result<Option<(Arc<IssuedCertificate>, &'static str)>> {
    for source in sources {
        if let Some(issued) = source.lookup(name)? {
            return Ok(Some((issued, source.label())));
        }
    }
    Ok(None)
}
