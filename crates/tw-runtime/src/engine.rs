use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use tw_config::EvaluationConfig;
use tw_core::{Evaluator, Origin, ReadyTrace, Rule, RuleStore, TenantContext, Trace, Violation};

use crate::metrics::RuntimeMetrics;

/// Violations found on one trace. Sent as a unit so a trace's matches reach
/// the sinks together or not at all.
pub type TraceViolations = Vec<Violation>;

/// Totals for one sweeper batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub evaluated: usize,
    pub violations: usize,
    pub timed_out: bool,
}

// ---------------------------------------------------------------------------
// AbandonOnDrop
// ---------------------------------------------------------------------------

/// Raises the abandon flag when the awaiting future goes away, whether it
/// finished, timed out or was aborted with its batch.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// TraceEvaluator
// ---------------------------------------------------------------------------

/// Evaluates ready traces against the tenant's active rules on the blocking
/// pool, bounded by a semaphore and two deadlines.
///
/// A trace that exceeds `trace_deadline` is abandoned: the timeout counter
/// increments and none of its matches are emitted. Dropping every clone
/// closes the violation channel.
#[derive(Clone)]
pub struct TraceEvaluator {
    store: Arc<RuleStore>,
    permits: Arc<Semaphore>,
    trace_deadline: Duration,
    batch_deadline: Duration,
    violation_tx: mpsc::Sender<TraceViolations>,
    metrics: Arc<RuntimeMetrics>,
}

impl TraceEvaluator {
    pub fn new(
        store: Arc<RuleStore>,
        config: &EvaluationConfig,
        violation_tx: mpsc::Sender<TraceViolations>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(config.parallelism.max(1))),
            trace_deadline: config.trace_deadline.as_duration(),
            batch_deadline: config.batch_deadline.as_duration(),
            violation_tx,
            metrics,
        }
    }

    /// Evaluate one trace and forward its violations. Returns how many were
    /// forwarded.
    pub async fn evaluate(&self, ready: ReadyTrace) -> usize {
        let ReadyTrace { trace, reason } = ready;
        self.metrics.inc_trace_ready(reason, trace.late);

        let rules = self.store.active_rules(&trace.tenant_id);
        if rules.is_empty() {
            return 0;
        }

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            tw_warn!(pipe, trace_id = %trace.trace_id, "evaluation permits closed, trace dropped");
            return 0;
        };

        let abandon = Arc::new(AtomicBool::new(false));
        let _guard = AbandonOnDrop(Arc::clone(&abandon));
        let tenant_id = trace.tenant_id.clone();
        let trace_id = trace.trace_id.clone();
        let rule_count = rules.len();

        let work = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let started = Instant::now();
            let found = evaluate_rules(&rules, &trace, &abandon);
            (found, started.elapsed())
        });

        let violations = match tokio::time::timeout(self.trace_deadline, work).await {
            Ok(Ok((Some(violations), elapsed))) => {
                self.metrics
                    .observe_trace_evaluation(elapsed, violations.len());
                violations
            }
            Ok(Ok((None, _))) => return 0,
            Ok(Err(e)) => {
                tw_error!(pipe, tenant = %tenant_id, trace_id = %trace_id, error = %e, "evaluation task failed");
                return 0;
            }
            Err(_) => {
                self.metrics.inc_evaluation_timeout();
                tw_warn!(pipe,
                    tenant = %tenant_id,
                    trace_id = %trace_id,
                    rules = rule_count,
                    deadline = ?self.trace_deadline,
                    "trace evaluation exceeded its deadline, result discarded"
                );
                return 0;
            }
        };

        if violations.is_empty() {
            return 0;
        }
        let n = violations.len();
        tw_debug!(pipe, tenant = %tenant_id, trace_id = %trace_id, violations = n, reason = reason.as_str(), "trace matched");
        if self.violation_tx.send(violations).await.is_err() {
            self.metrics.inc_violation_channel_send_failed();
            tw_warn!(pipe, trace_id = %trace_id, violations = n, "violation channel closed, matches lost");
            return 0;
        }
        n
    }

    /// Evaluate a sweep batch concurrently under the batch deadline. Traces
    /// still running when it expires are abandoned.
    pub async fn evaluate_batch(&self, traces: Vec<ReadyTrace>) -> BatchReport {
        let mut report = BatchReport::default();
        if traces.is_empty() {
            return report;
        }
        let total = traces.len();
        let mut set = JoinSet::new();
        for ready in traces {
            let this = self.clone();
            set.spawn(async move { this.evaluate(ready).await });
        }

        let deadline = tokio::time::sleep(self.batch_deadline);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok(n)) => {
                        report.evaluated += 1;
                        report.violations += n;
                    }
                    Some(Err(e)) => tw_warn!(pipe, error = %e, "batch evaluation task failed"),
                    None => break,
                },
                _ = &mut deadline => {
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    report.timed_out = true;
                    self.metrics.inc_batch_timeout();
                    tw_warn!(pipe,
                        traces = total,
                        finished = report.evaluated,
                        deadline = ?self.batch_deadline,
                        "evaluation batch exceeded its deadline, unfinished traces abandoned"
                    );
                    break;
                }
            }
        }
        report
    }
}

/// Run every rule against one trace. `None` once `abandon` is raised, so an
/// abandoned trace yields no partial matches.
pub(crate) fn evaluate_rules(
    rules: &[Arc<Rule>],
    trace: &Trace,
    abandon: &AtomicBool,
) -> Option<Vec<Violation>> {
    let ctx = TenantContext::new(&trace.tenant_id);
    let mut violations = Vec::new();
    for rule in rules {
        if abandon.load(Ordering::Relaxed) {
            return None;
        }
        let outcome = Evaluator::evaluate_with_context(&rule.expr, trace, &ctx);
        if outcome.matched {
            violations.push(Violation::from_match(rule, trace, outcome, Origin::Live));
        }
    }
    if abandon.load(Ordering::Relaxed) {
        return None;
    }
    Some(violations)
}

#[cfg(test)]
mod tests {
    use tw_core::{ReadyReason, RuleDefinition, Span, UpsertOutcome};

    use super::*;

    fn store_with(rules: &[(&str, &str)]) -> Arc<RuleStore> {
        let store = Arc::new(RuleStore::default());
        for (id, source) in rules {
            let outcome = store
                .upsert(RuleDefinition::new("acme", *id, *source))
                .unwrap();
            assert!(matches!(outcome, UpsertOutcome::Stored { .. }));
        }
        store
    }

    fn ready(trace_id: &str, ops: &[&str]) -> ReadyTrace {
        let spans = ops
            .iter()
            .enumerate()
            .map(|(i, op)| Span::new(trace_id, format!("s{i}"), *op).with_times(0, 1_000))
            .collect();
        ReadyTrace {
            trace: Trace::new("acme", trace_id, spans),
            reason: ReadyReason::Inactivity,
        }
    }

    fn evaluator(store: Arc<RuleStore>) -> (TraceEvaluator, mpsc::Receiver<TraceViolations>) {
        let (tx, rx) = mpsc::channel(16);
        let eval = TraceEvaluator::new(
            store,
            &EvaluationConfig::default(),
            tx,
            Arc::new(RuntimeMetrics::new()),
        );
        (eval, rx)
    }

    #[test]
    fn abandoned_evaluation_yields_nothing() {
        let store = store_with(&[("r1", "trace.has(db.query)")]);
        let rules = store.active_rules("acme");
        let trace = ready("t1", &["db.query"]).trace;

        let found = evaluate_rules(&rules, &trace, &AtomicBool::new(false)).unwrap();
        assert_eq!(found.len(), 1);
        assert!(evaluate_rules(&rules, &trace, &AtomicBool::new(true)).is_none());
    }

    #[tokio::test]
    async fn matches_are_forwarded_per_trace() {
        let store = store_with(&[
            ("r1", "trace.has(db.query)"),
            ("r2", "trace.count(db.query) >= 2"),
            ("r3", "trace.has(cache.miss)"),
        ]);
        let (eval, mut rx) = evaluator(store);

        assert_eq!(eval.evaluate(ready("t1", &["db.query", "db.query"])).await, 2);
        let batch = rx.recv().await.unwrap();
        let mut ids: Vec<_> = batch.iter().map(|v| v.rule_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["r1", "r2"]);
        assert!(batch.iter().all(|v| v.origin == Origin::Live));

        assert_eq!(eval.evaluate(ready("t2", &["http.get"])).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tenants_without_rules_skip_evaluation() {
        let (eval, _rx) = evaluator(Arc::new(RuleStore::default()));
        assert_eq!(eval.evaluate(ready("t1", &["db.query"])).await, 0);
        assert_eq!(eval.metrics.snapshot().trace_evaluations, 0);
        assert_eq!(eval.metrics.snapshot().traces_ready, 1);
    }

    #[tokio::test]
    async fn batch_reports_totals() {
        let store = store_with(&[("r1", "trace.has(db.query)")]);
        let (eval, mut rx) = evaluator(store);
        let report = eval
            .evaluate_batch(vec![
                ready("t1", &["db.query"]),
                ready("t2", &["http.get"]),
                ready("t3", &["db.query"]),
            ])
            .await;
        assert_eq!(
            report,
            BatchReport {
                evaluated: 3,
                violations: 2,
                timed_out: false
            }
        );
        let mut traces = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        traces.sort_by(|a, b| a[0].trace_id.cmp(&b[0].trace_id));
        assert_eq!(traces[0][0].trace_id, "t1");
        assert_eq!(traces[1][0].trace_id, "t3");
    }

    #[tokio::test]
    async fn closed_channel_counts_send_failures() {
        let store = store_with(&[("r1", "trace.has(db.query)")]);
        let (eval, rx) = evaluator(store);
        drop(rx);
        assert_eq!(eval.evaluate(ready("t1", &["db.query"])).await, 0);
        assert_eq!(eval.metrics.snapshot().violation_channel_send_failed, 1);
    }
}
