mod rule;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use orion_error::prelude::*;
use tw_config::{LimitsConfig, StoreConfig};
use tw_lang::{CompileFailure, CompileLimits, compile_rule_with};

use crate::error::{CoreReason, CoreResult};

pub use rule::{Rule, RuleDefinition, Severity, TenantRules};

type TenantMap = HashMap<String, Arc<TenantRules>>;

/// Last revision of every removed `(tenant, rule)` id.
type RetiredRevisions = HashMap<(String, String), u64>;

/// Result of [`RuleStore::upsert`].
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The new revision is visible to every subsequent reader.
    Stored {
        rule: Arc<Rule>,
        previous_revision: Option<u64>,
    },
    /// The source did not compile. The previous revision, if any, stays
    /// active.
    Rejected(CompileFailure),
}

// ---------------------------------------------------------------------------
// RuleStore
// ---------------------------------------------------------------------------

/// Per-tenant compiled rules behind a copy-on-write pointer.
///
/// Readers load the current map without locking and always see either the
/// complete old state or the complete new one. Writers serialize on a mutex,
/// build a new map that shares untouched tenants, and swap it in.
///
/// Revisions of a rule id never repeat: re-creating a removed id continues
/// from its last revision.
pub struct RuleStore {
    current: ArcSwap<TenantMap>,
    writer: Mutex<RetiredRevisions>,
    config: StoreConfig,
    limits: CompileLimits,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(StoreConfig::default(), &LimitsConfig::default())
    }
}

impl RuleStore {
    pub fn new(config: StoreConfig, limits: &LimitsConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(TenantMap::new()),
            writer: Mutex::new(RetiredRevisions::new()),
            config,
            limits: limits.to_compile_limits(),
        }
    }

    /// Compile `def` and publish it as the next revision of its rule id.
    pub fn upsert(&self, def: RuleDefinition) -> CoreResult<UpsertOutcome> {
        check_id("tenant id", &def.tenant_id)?;
        check_id("rule id", &def.rule_id)?;

        let compiled = match compile_rule_with(&def.source, &self.limits) {
            Ok(compiled) => compiled,
            Err(failure) => {
                log::info!(
                    "rule {}/{} rejected: {}",
                    def.tenant_id,
                    def.rule_id,
                    failure.category()
                );
                return Ok(UpsertOutcome::Rejected(failure));
            }
        };

        let mut retired = self.writer.lock().expect("rule store writer lock poisoned");
        let map = self.current.load_full();
        let tenant = map.get(&def.tenant_id).cloned().unwrap_or_default();

        let previous_revision = tenant.get(&def.rule_id).map(|r| r.revision);
        if previous_revision.is_none() && tenant.len() >= self.config.max_rules_per_tenant {
            return StructError::from(CoreReason::RuleStore)
                .with_detail(format!(
                    "tenant {} already holds the maximum of {} rules",
                    def.tenant_id, self.config.max_rules_per_tenant
                ))
                .err();
        }

        let revision = previous_revision
            .or_else(|| retired.remove(&(def.tenant_id.clone(), def.rule_id.clone())))
            .map_or(1, |r| r + 1);
        let rule = Arc::new(Rule {
            id: def.rule_id,
            tenant_id: def.tenant_id,
            source: def.source,
            expr: Arc::new(compiled.expr),
            enabled: def.enabled,
            revision,
            severity: def.severity,
            description: def.description,
            warnings: compiled.warnings,
        });
        self.publish(&map, &rule.tenant_id, tenant.with_rule(Arc::clone(&rule)));

        log::info!(
            "rule {}/{} stored at revision {} ({} warnings)",
            rule.tenant_id,
            rule.id,
            rule.revision,
            rule.warnings.len()
        );
        Ok(UpsertOutcome::Stored {
            rule,
            previous_revision,
        })
    }

    /// Remove a rule. Returns the revision that was active, if any.
    pub fn remove(&self, tenant_id: &str, rule_id: &str) -> Option<Arc<Rule>> {
        let mut retired = self.writer.lock().expect("rule store writer lock poisoned");
        let map = self.current.load_full();
        let tenant = map.get(tenant_id)?;
        let removed = Arc::clone(tenant.get(rule_id)?);
        self.publish(&map, tenant_id, tenant.without_rule(rule_id));
        retired.insert((tenant_id.to_string(), rule_id.to_string()), removed.revision);
        log::info!("rule {tenant_id}/{rule_id} removed at revision {}", removed.revision);
        Some(removed)
    }

    /// Enable or disable a rule without recompiling it. The revision is
    /// kept, so violation ids stay stable.
    pub fn set_enabled(&self, tenant_id: &str, rule_id: &str, enabled: bool) -> CoreResult<Arc<Rule>> {
        let _guard = self.writer.lock().expect("rule store writer lock poisoned");
        let map = self.current.load_full();
        let Some(existing) = map.get(tenant_id).and_then(|t| t.get(rule_id)) else {
            return StructError::from(CoreReason::RuleStore)
                .with_detail(format!("unknown rule {tenant_id}/{rule_id}"))
                .err();
        };
        if existing.enabled == enabled {
            return Ok(Arc::clone(existing));
        }
        let rule = Arc::new(Rule {
            enabled,
            ..Rule::clone(existing)
        });
        let tenant = map.get(tenant_id).cloned().unwrap_or_default();
        self.publish(&map, tenant_id, tenant.with_rule(Arc::clone(&rule)));
        log::info!("rule {tenant_id}/{rule_id} enabled={enabled}");
        Ok(rule)
    }

    pub fn get(&self, tenant_id: &str, rule_id: &str) -> Option<Arc<Rule>> {
        self.current
            .load()
            .get(tenant_id)
            .and_then(|t| t.get(rule_id))
            .cloned()
    }

    /// The tenant's rules as of now. Later writes do not affect the
    /// returned snapshot.
    pub fn snapshot(&self, tenant_id: &str) -> Arc<TenantRules> {
        self.current
            .load()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Enabled rules of a tenant, ordered by rule id.
    pub fn active_rules(&self, tenant_id: &str) -> Vec<Arc<Rule>> {
        self.snapshot(tenant_id).active().cloned().collect()
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.current.load().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn rule_count(&self) -> usize {
        self.current.load().values().map(|t| t.len()).sum()
    }

    fn publish(&self, map: &TenantMap, tenant_id: &str, rules: TenantRules) {
        let mut next = map.clone();
        if rules.is_empty() {
            next.remove(tenant_id);
        } else {
            next.insert(tenant_id.to_string(), Arc::new(rules));
        }
        self.current.store(Arc::new(next));
    }
}

fn check_id(what: &str, id: &str) -> CoreResult<()> {
    if id.trim().is_empty() {
        return StructError::from(CoreReason::RuleStore)
            .with_detail(format!("{what} must not be empty"))
            .err();
    }
    Ok(())
}
