use serde::{Deserialize, Serialize};

/// `[store]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cap on distinct rule ids per tenant. Replacing an existing rule never
    /// counts against it.
    pub max_rules_per_tenant: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_rules_per_tenant: 100_000,
        }
    }
}
