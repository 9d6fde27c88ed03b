use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tw_lang::Diagnostic;
use tw_lang::ast::Expr;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => anyhow::bail!("unknown severity {s:?} (expected low/medium/high/critical)"),
        }
    }
}

// ---------------------------------------------------------------------------
// RuleDefinition
// ---------------------------------------------------------------------------

/// Rule as submitted by a rule author, before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_id: String,
    pub tenant_id: String,
    pub source: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(
        tenant_id: impl Into<String>,
        rule_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            tenant_id: tenant_id.into(),
            source: source.into(),
            severity: Severity::default(),
            enabled: true,
            description: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One compiled revision of a rule. Never mutated: updates publish a new
/// `Rule` and readers holding the old one keep a consistent view.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub tenant_id: String,
    pub source: String,
    pub expr: Arc<Expr>,
    pub enabled: bool,
    pub revision: u64,
    pub severity: Severity,
    pub description: Option<String>,
    pub warnings: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// TenantRules
// ---------------------------------------------------------------------------

/// Immutable snapshot of one tenant's rules, keyed by rule id.
#[derive(Debug, Clone, Default)]
pub struct TenantRules {
    rules: BTreeMap<String, Arc<Rule>>,
}

impl TenantRules {
    pub fn get(&self, rule_id: &str) -> Option<&Arc<Rule>> {
        self.rules.get(rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// Enabled rules ordered by id.
    pub fn active(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values().filter(|r| r.enabled)
    }

    pub(super) fn with_rule(&self, rule: Arc<Rule>) -> Self {
        let mut rules = self.rules.clone();
        rules.insert(rule.id.clone(), rule);
        Self { rules }
    }

    pub(super) fn without_rule(&self, rule_id: &str) -> Self {
        let mut rules = self.rules.clone();
        rules.remove(rule_id);
        Self { rules }
    }
}
