use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use orion_error::prelude::*;

use tw_core::{ReplayEngine, ReplayReport, ReplayRequest, TraceSource};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

/// Run a replay on the blocking pool. Past `deadline` the replay is told to
/// stop and a `Deadline` error is returned; nothing partial is reported.
#[tracing::instrument(name = "replay", skip_all, fields(tenant = %req.tenant_id))]
pub async fn run_replay(
    engine: Arc<ReplayEngine>,
    req: ReplayRequest,
    source: Arc<dyn TraceSource>,
    deadline: Duration,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> RuntimeResult<ReplayReport> {
    if let Some(metrics) = &metrics {
        metrics.inc_replay();
    }
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let work = tokio::task::spawn_blocking(move || engine.run_until(&req, source.as_ref(), &stop_flag));

    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(report)) => {
            let report = report.err_conv()?;
            tw_info!(pipe,
                rule_id = %report.rule_id,
                revision = report.revision,
                scanned = report.traces_scanned,
                violations = report.violations.len(),
                "replay finished"
            );
            Ok(report)
        }
        Ok(Err(e)) => Err(StructError::from(RuntimeReason::Shutdown)
            .with_detail(format!("replay task failed: {e}"))),
        Err(_) => {
            stop.store(true, Ordering::Relaxed);
            tw_warn!(pipe, deadline = ?deadline, "replay exceeded its deadline and was stopped");
            Err(StructError::from(RuntimeReason::Deadline)
                .with_detail(format!("replay did not finish within {deadline:?}")))
        }
    }
}
