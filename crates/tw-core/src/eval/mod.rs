mod compare;


use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tw_lang::ast::{Expr, LogicOp, OperationPattern, WhereClause};

use crate::span::{AttrValue, Span, Trace};

use compare::clause_holds;

// ---------------------------------------------------------------------------
// Context & outcome types
// ---------------------------------------------------------------------------

/// The tenant on whose behalf a rule is evaluated. A trace owned by another
/// tenant never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }
}

/// A span that witnessed a match, with the attribute values its where
/// clauses were checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanBinding {
    pub span_id: String,
    pub operation_name: String,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Work counters for one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvalStats {
    /// `has`/`count` nodes actually evaluated.
    pub checks_evaluated: u64,
    pub spans_visited: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutcome {
    pub matched: bool,
    /// Witness span ids in first-seen order, without duplicates.
    pub span_ids: Vec<String>,
    pub bindings: Vec<SpanBinding>,
    pub stats: EvalStats,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Tree-walking interpreter over compiled rule expressions.
///
/// The only operations reachable from a rule are operation-name matching,
/// attribute lookup on a span and comparison against a literal. Evaluation
/// is total: it always terminates and never fails.
pub struct Evaluator;

impl Evaluator {
    pub fn evaluate(expr: &Expr, trace: &Trace, ctx: &TenantContext) -> bool {
        if !owned_by(trace, ctx) {
            return false;
        }
        Walk::new(trace, false).expr(expr)
    }

    /// Like [`evaluate`](Self::evaluate), also returning the spans and
    /// attribute values that made the rule match.
    pub fn evaluate_with_context(expr: &Expr, trace: &Trace, ctx: &TenantContext) -> EvalOutcome {
        if !owned_by(trace, ctx) {
            return EvalOutcome::default();
        }
        let mut walk = Walk::new(trace, true);
        let matched = walk.expr(expr);
        let bindings = if matched { walk.witnesses } else { Vec::new() };
        let mut span_ids: Vec<String> = Vec::with_capacity(bindings.len());
        for b in &bindings {
            if !span_ids.contains(&b.span_id) {
                span_ids.push(b.span_id.clone());
            }
        }
        EvalOutcome {
            matched,
            span_ids,
            bindings,
            stats: walk.stats,
        }
    }
}

fn owned_by(trace: &Trace, ctx: &TenantContext) -> bool {
    if trace.tenant_id == ctx.tenant_id {
        return true;
    }
    log::warn!(
        "trace {} belongs to tenant {}, refusing evaluation for tenant {}",
        trace.trace_id,
        trace.tenant_id,
        ctx.tenant_id
    );
    false
}

// ---------------------------------------------------------------------------
// Walk (internal)
// ---------------------------------------------------------------------------

struct Walk<'t> {
    trace: &'t Trace,
    collect: bool,
    witnesses: Vec<SpanBinding>,
    stats: EvalStats,
}

impl<'t> Walk<'t> {
    fn new(trace: &'t Trace, collect: bool) -> Self {
        Self {
            trace,
            collect,
            witnesses: Vec::new(),
            stats: EvalStats::default(),
        }
    }

    /// Witnesses survive only along branches that evaluate to true.
    fn expr(&mut self, expr: &Expr) -> bool {
        let mark = self.witnesses.len();
        let matched = match expr {
            Expr::Has { pattern, wheres } => self.has(pattern, wheres),
            Expr::Count {
                pattern,
                wheres,
                op,
                value,
            } => {
                let counted = self.count(pattern, wheres);
                op.compare_u64(counted, *value)
            }
            Expr::Binary { op, left, right } => match op {
                LogicOp::And => self.expr(left) && self.expr(right),
                LogicOp::Or => self.expr(left) || self.expr(right),
            },
            Expr::Not(inner) => {
                let inner = self.expr(inner);
                self.witnesses.truncate(mark);
                !inner
            }
        };
        if !matched {
            self.witnesses.truncate(mark);
        }
        matched
    }

    fn has(&mut self, pattern: &OperationPattern, wheres: &[WhereClause]) -> bool {
        self.stats.checks_evaluated += 1;
        for span in &self.trace.spans {
            self.stats.spans_visited += 1;
            if !pattern.matches(&span.operation_name) {
                continue;
            }
            if let Some(binding) = self.satisfies(span, wheres) {
                if let Some(b) = binding {
                    self.witnesses.push(b);
                }
                return true;
            }
        }
        false
    }

    fn count(&mut self, pattern: &OperationPattern, wheres: &[WhereClause]) -> u64 {
        self.stats.checks_evaluated += 1;
        let mut counted = 0u64;
        for span in &self.trace.spans {
            self.stats.spans_visited += 1;
            if !pattern.matches(&span.operation_name) {
                continue;
            }
            if let Some(binding) = self.satisfies(span, wheres) {
                counted += 1;
                if let Some(b) = binding {
                    self.witnesses.push(b);
                }
            }
        }
        counted
    }

    /// `Some(_)` when every clause holds on this one span; the inner binding
    /// is only built while collecting witnesses.
    fn satisfies(&self, span: &Span, wheres: &[WhereClause]) -> Option<Option<SpanBinding>> {
        let mut attributes = BTreeMap::new();
        for clause in wheres {
            let value = clause_holds(clause, span)?;
            if self.collect {
                attributes.insert(clause.attribute.clone(), value.to_attr());
            }
        }
        Some(self.collect.then(|| SpanBinding {
            span_id: span.span_id.clone(),
            operation_name: span.operation_name.clone(),
            attributes,
        }))
    }
}
