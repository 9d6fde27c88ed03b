use std::sync::Arc;

use orion_error::prelude::*;

use tw_core::{Rule, RuleDefinition, RuleStore, UpsertOutcome};
use tw_lang::ErrorCategory;

use crate::error::RuntimeResult;
use crate::metrics::RuntimeMetrics;

/// Rule management entry point for a running reactor. Wraps the store with
/// rejection metrics and audit logging; rejections caused by parser resource
/// limits are logged with `abuse = true`.
#[derive(Clone)]
pub struct RuleAdmin {
    store: Arc<RuleStore>,
    metrics: Arc<RuntimeMetrics>,
}

impl RuleAdmin {
    pub fn new(store: Arc<RuleStore>, metrics: Arc<RuntimeMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn upsert(&self, def: RuleDefinition) -> RuntimeResult<UpsertOutcome> {
        let tenant = def.tenant_id.clone();
        let rule_id = def.rule_id.clone();
        let source_bytes = def.source.len();
        let outcome = self.store.upsert(def).err_conv()?;

        match &outcome {
            UpsertOutcome::Stored {
                rule: stored,
                previous_revision,
            } => {
                tw_info!(rule,
                    tenant = %tenant,
                    rule_id = %rule_id,
                    revision = stored.revision,
                    previous = ?previous_revision,
                    warnings = stored.warnings.len(),
                    "rule stored"
                );
            }
            UpsertOutcome::Rejected(failure) => {
                let category = failure.category();
                self.metrics.inc_rule_rejected(category);
                match category {
                    ErrorCategory::RecursionLimitExceeded | ErrorCategory::ParseTimeout => {
                        tw_warn!(rule,
                            abuse = true,
                            tenant = %tenant,
                            rule_id = %rule_id,
                            category = category.as_str(),
                            source_bytes,
                            "rule rejected by parser resource limit"
                        );
                    }
                    _ => {
                        tw_info!(rule,
                            tenant = %tenant,
                            rule_id = %rule_id,
                            category = category.as_str(),
                            errors = failure.errors().count(),
                            "rule rejected"
                        );
                    }
                }
            }
        }
        Ok(outcome)
    }

    pub fn remove(&self, tenant_id: &str, rule_id: &str) -> Option<Arc<Rule>> {
        let removed = self.store.remove(tenant_id, rule_id);
        if let Some(rule) = &removed {
            tw_info!(rule, tenant = tenant_id, rule_id, revision = rule.revision, "rule removed");
        }
        removed
    }

    pub fn set_enabled(&self, tenant_id: &str, rule_id: &str, enabled: bool) -> RuntimeResult<Arc<Rule>> {
        let rule = self.store.set_enabled(tenant_id, rule_id, enabled).err_conv()?;
        tw_info!(rule, tenant = tenant_id, rule_id, enabled, "rule toggled");
        Ok(rule)
    }
}
