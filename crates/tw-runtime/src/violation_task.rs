use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use tw_core::ViolationSink;

use crate::engine::TraceViolations;
use crate::metrics::RuntimeMetrics;

/// Bounded capacity of the violation channel, in traces.
pub const VIOLATION_CHANNEL_CAPACITY: usize = 256;

/// Hand violations to the sink in arrival order.
///
/// Sink writes run on the blocking pool, one trace at a time. The task ends
/// when every evaluator has dropped its sender and the channel is drained.
pub async fn run_violation_dispatcher(
    mut rx: mpsc::Receiver<TraceViolations>,
    sink: Arc<dyn ViolationSink>,
    metrics: Arc<RuntimeMetrics>,
) {
    while let Some(violations) = rx.recv().await {
        let sink = Arc::clone(&sink);
        let metrics_for_batch = Arc::clone(&metrics);
        let written = tokio::task::spawn_blocking(move || {
            for v in &violations {
                let started = Instant::now();
                let result = sink.send(v);
                metrics_for_batch.observe_violation_dispatch(started.elapsed(), result.is_ok());
                if let Err(e) = result {
                    tw_error!(pipe,
                        violation_id = %v.violation_id,
                        rule_id = %v.rule_id,
                        trace_id = %v.trace_id,
                        error = %e,
                        "violation sink write failed"
                    );
                }
            }
        })
        .await;
        if let Err(e) = written {
            tw_error!(pipe, error = %e, "violation dispatch task failed");
        }
    }
    tw_debug!(pipe, "violation channel closed");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tw_core::{MemoryViolationSink, Origin, Severity, Violation};

    use super::*;

    fn violation(trace_id: &str) -> Violation {
        Violation {
            violation_id: format!("id-{trace_id}"),
            rule_id: "r1".into(),
            rule_revision: 1,
            tenant_id: "acme".into(),
            trace_id: trace_id.into(),
            severity: Severity::High,
            span_ids: vec!["s1".into()],
            bindings: vec![],
            occurred_at_nanos: 0,
            occurred_at: "1970-01-01T00:00:00.000000000Z".into(),
            origin: Origin::Live,
            late: false,
        }
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    impl ViolationSink for Flaky {
        fn send(&self, _violation: &Violation) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::Relaxed) == 0 {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_in_order_until_channel_closes() {
        let memory = Arc::new(MemoryViolationSink::new());
        let metrics = Arc::new(RuntimeMetrics::new());
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_violation_dispatcher(
            rx,
            memory.clone(),
            Arc::clone(&metrics),
        ));
        tx.send(vec![violation("t1"), violation("t2")]).await.unwrap();
        tx.send(vec![violation("t3")]).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let traces: Vec<_> = memory.records().into_iter().map(|v| v.trace_id).collect();
        assert_eq!(traces, ["t1", "t2", "t3"]);
        assert_eq!(metrics.snapshot().violations_emitted, 3);
    }

    #[tokio::test]
    async fn sink_errors_are_counted_and_skipped() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let (tx, rx) = mpsc::channel(4);
        let sink = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let task = tokio::spawn(run_violation_dispatcher(rx, sink, Arc::clone(&metrics)));
        tx.send(vec![violation("t1"), violation("t2")]).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let s = metrics.snapshot();
        assert_eq!(s.violation_sink_errors, 1);
        assert_eq!(s.violations_emitted, 1);
    }
}
