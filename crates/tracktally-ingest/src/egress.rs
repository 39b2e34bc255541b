//! Egress routing for fetch workers
//!
//! Spreads concurrent workers across a pool of named proxy relays so requests
//! leave through distinct egress paths.

use std::fmt;

/// Name of a proxy relay, e.g. `lambda-scraper-3`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyIdentity(String);

impl ProxyIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps worker slots to proxy identities
///
/// Pure function of its configuration: slot `i` always routes through
/// `{base}-{i mod pool_size}`, or directly when no base name is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressRouter {
    base: Option<String>,
    pool_size: usize,
}

impl EgressRouter {
    pub fn new(base: Option<String>, pool_size: usize) -> Self {
        Self {
            base: base.filter(|b| !b.is_empty()),
            pool_size: pool_size.max(1),
        }
    }

    /// Router that sends every worker directly
    pub fn direct() -> Self {
        Self::new(None, 1)
    }

    pub fn route_for(&self, worker_index: usize) -> Option<ProxyIdentity> {
        self.base
            .as_ref()
            .map(|base| ProxyIdentity(format!("{}-{}", base, worker_index % self.pool_size)))
    }

    pub fn is_direct(&self) -> bool {
        self.base.is_none()
    }
}
