use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tw_core::TraceBuffer;

use crate::engine::TraceEvaluator;
use crate::metrics::RuntimeMetrics;

/// Periodically close traces whose inactivity timeout has passed and
/// evaluate them as one batch, until cancelled.
#[tracing::instrument(name = "sweeper", skip_all)]
pub async fn run_sweeper(
    buffer: Arc<TraceBuffer>,
    evaluator: TraceEvaluator,
    metrics: Arc<RuntimeMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let ready = buffer.sweep_at(tokio::time::Instant::now().into_std());
                metrics.set_pending_traces(buffer.pending_traces());
                if ready.is_empty() {
                    continue;
                }
                let traces = ready.len();
                let report = evaluator.evaluate_batch(ready).await;
                tw_debug!(res,
                    traces,
                    evaluated = report.evaluated,
                    violations = report.violations,
                    timed_out = report.timed_out,
                    "inactivity sweep"
                );
            }
            _ = cancel.cancelled() => break,
        }
    }
}
