//! Lease id to endpoint resolution.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};

pub trait LeaseResolver {
    fn resolve(&self, lease: &str) -> Result<String>;
}

/// Resolves leases from the `[leases]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigLeases {
    leases: BTreeMap<String, String>,
}

impl ConfigLeases {
    pub fn new(leases: BTreeMap<String, String>) -> Self {
        Self { leases }
    }
}

impl LeaseResolver for ConfigLeases {
    fn resolve(&self, lease: &str) -> Result<String> {
        self.leases
            .get(lease)
            .cloned()
            .ok_or_else(|| anyhow!("unknown lease {lease}; add it under [leases] in the config"))
    }
}
