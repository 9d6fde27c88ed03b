mod source;


use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use orion_error::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tw_lang::{CompileLimits, compile_rule_with};

use crate::error::{CoreReason, CoreResult};
use crate::eval::{Evaluator, TenantContext};
use crate::store::{Rule, RuleStore, Severity};
use crate::violation::{Origin, Violation};

pub use source::{JsonlTraceSource, MemoryTraceSource, TraceIter, TraceSource};

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// Half-open interval `[start_nanos, end_nanos)` of trace end times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_nanos: i64,
    pub end_nanos: i64,
}

impl TimeRange {
    pub fn new(start_nanos: i64, end_nanos: i64) -> Self {
        Self {
            start_nanos,
            end_nanos,
        }
    }

    pub fn all() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn contains(&self, nanos: i64) -> bool {
        nanos >= self.start_nanos && nanos < self.end_nanos
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSelector {
    /// The revision currently held by the rule store, enabled or not.
    Stored { rule_id: String },
    /// Ad-hoc source, compiled for this replay only.
    Inline {
        source: String,
        #[serde(default)]
        severity: Severity,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub tenant_id: String,
    pub rule: RuleSelector,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub rule_id: String,
    pub revision: u64,
    pub traces_scanned: u64,
    pub traces_out_of_range: u64,
    /// Ordered by `(occurred_at_nanos, trace_id)`, one per violation id.
    pub violations: Vec<Violation>,
}

// ---------------------------------------------------------------------------
// ReplayEngine
// ---------------------------------------------------------------------------

/// Runs one rule over every historical trace in a range, using the same
/// evaluator as live traffic. No sampling; the same rule revision over the
/// same traces always yields the same report.
pub struct ReplayEngine {
    store: Arc<RuleStore>,
    limits: CompileLimits,
}

impl ReplayEngine {
    pub fn new(store: Arc<RuleStore>, limits: CompileLimits) -> Self {
        Self { store, limits }
    }

    pub fn run(&self, req: &ReplayRequest, source: &dyn TraceSource) -> CoreResult<ReplayReport> {
        self.run_until(req, source, &AtomicBool::new(false))
    }

    /// Like [`run`](Self::run), abandoning the replay once `stop` is set.
    /// An abandoned replay reports nothing.
    pub fn run_until(
        &self,
        req: &ReplayRequest,
        source: &dyn TraceSource,
        stop: &AtomicBool,
    ) -> CoreResult<ReplayReport> {
        if req.range.start_nanos >= req.range.end_nanos {
            return StructError::from(CoreReason::Replay)
                .with_detail(format!(
                    "empty time range [{}, {})",
                    req.range.start_nanos, req.range.end_nanos
                ))
                .err();
        }
        let rule = self.resolve(req)?;
        let ctx = TenantContext::new(&req.tenant_id);

        let mut report = ReplayReport {
            rule_id: rule.id.clone(),
            revision: rule.revision,
            traces_scanned: 0,
            traces_out_of_range: 0,
            violations: Vec::new(),
        };
        let mut seen = HashSet::new();

        for trace in source.traces(&req.tenant_id, &req.range)? {
            if stop.load(Ordering::Relaxed) {
                return StructError::from(CoreReason::Replay)
                    .with_detail(format!(
                        "replay of {} abandoned after {} traces",
                        rule.id, report.traces_scanned
                    ))
                    .err();
            }
            let trace = trace?;
            if !req.range.contains(trace.end_nanos()) {
                report.traces_out_of_range += 1;
                continue;
            }
            report.traces_scanned += 1;

            let outcome = Evaluator::evaluate_with_context(&rule.expr, &trace, &ctx);
            if outcome.matched {
                let v = Violation::from_match(&rule, &trace, outcome, Origin::Replay);
                if seen.insert(v.violation_id.clone()) {
                    report.violations.push(v);
                }
            }
        }

        report
            .violations
            .sort_by(|a, b| (a.occurred_at_nanos, &a.trace_id).cmp(&(b.occurred_at_nanos, &b.trace_id)));
        log::info!(
            "replay of {}/{} rev {}: {} traces, {} violations",
            req.tenant_id,
            report.rule_id,
            report.revision,
            report.traces_scanned,
            report.violations.len()
        );
        Ok(report)
    }

    fn resolve(&self, req: &ReplayRequest) -> CoreResult<Arc<Rule>> {
        match &req.rule {
            RuleSelector::Stored { rule_id } => {
                self.store.get(&req.tenant_id, rule_id).ok_or_else(|| {
                    StructError::from(CoreReason::Replay)
                        .with_detail(format!("unknown rule {}/{rule_id}", req.tenant_id))
                })
            }
            RuleSelector::Inline { source, severity } => {
                let compiled = compile_rule_with(source, &self.limits).map_err(|failure| {
                    StructError::from(CoreReason::RuleCompile).with_detail(failure.to_string())
                })?;
                Ok(Arc::new(Rule {
                    id: inline_rule_id(source),
                    tenant_id: req.tenant_id.clone(),
                    source: source.clone(),
                    expr: Arc::new(compiled.expr),
                    enabled: true,
                    revision: 0,
                    severity: *severity,
                    description: None,
                    warnings: compiled.warnings,
                }))
            }
        }
    }
}

/// Inline rules are identified by their source, so replaying the same text
/// twice produces the same violation ids.
fn inline_rule_id(source: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(source.as_bytes()));
    format!("inline-{}", &digest[..16])
}
