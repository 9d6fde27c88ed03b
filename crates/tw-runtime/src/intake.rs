use std::sync::Arc;

use orion_error::prelude::*;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tw_core::{AddOutcome, Span, TenantSpan, TraceBuffer};

use crate::engine::TraceEvaluator;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

/// Bounded capacity of the span intake channel.
pub const SPAN_CHANNEL_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// SpanSender
// ---------------------------------------------------------------------------

/// Handle for feeding tenant-scoped spans into a running reactor. Cheap to
/// clone; sends fail once the reactor has begun shutting down.
#[derive(Clone)]
pub struct SpanSender {
    tx: mpsc::Sender<TenantSpan>,
}

impl SpanSender {
    pub(crate) fn new(tx: mpsc::Sender<TenantSpan>) -> Self {
        Self { tx }
    }

    /// Waits for channel capacity.
    pub async fn send(&self, tenant_id: impl Into<String>, span: Span) -> RuntimeResult<()> {
        self.tx
            .send(TenantSpan::new(tenant_id, span))
            .await
            .map_err(|_| {
                StructError::from(RuntimeReason::Shutdown)
                    .with_detail("span intake is closed".to_string())
            })
    }

    /// Fails immediately when the channel is full.
    pub fn try_send(&self, tenant_id: impl Into<String>, span: Span) -> RuntimeResult<()> {
        self.tx
            .try_send(TenantSpan::new(tenant_id, span))
            .map_err(|e| match e {
                TrySendError::Full(ts) => StructError::from(RuntimeReason::Overloaded)
                    .with_detail(format!(
                        "span intake is full, span {} of trace {} not accepted",
                        ts.span.span_id, ts.span.trace_id
                    )),
                TrySendError::Closed(_) => StructError::from(RuntimeReason::Shutdown)
                    .with_detail("span intake is closed".to_string()),
            })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// run_intake
// ---------------------------------------------------------------------------

/// Move spans from the channel into the trace buffer. Traces closed by
/// their root span are evaluated right away, concurrently with intake.
///
/// On cancellation the channel is closed, spans already queued are still
/// buffered, and the task waits for in-flight evaluations before returning.
#[tracing::instrument(name = "intake", skip_all)]
pub async fn run_intake(
    mut rx: mpsc::Receiver<TenantSpan>,
    buffer: Arc<TraceBuffer>,
    evaluator: TraceEvaluator,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(ts) => ingest(ts, &buffer, &evaluator, &metrics, &mut inflight),
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    tw_warn!(pipe, error = %e, "root-ready evaluation task failed");
                }
            }
            _ = cancel.cancelled() => {
                rx.close();
                let mut drained = 0usize;
                while let Some(ts) = rx.recv().await {
                    ingest(ts, &buffer, &evaluator, &metrics, &mut inflight);
                    drained += 1;
                }
                tw_debug!(pipe, drained, "span intake closed");
                break;
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            tw_warn!(pipe, error = %e, "root-ready evaluation task failed");
        }
    }
    Ok(())
}

fn ingest(
    ts: TenantSpan,
    buffer: &TraceBuffer,
    evaluator: &TraceEvaluator,
    metrics: &RuntimeMetrics,
    inflight: &mut JoinSet<usize>,
) {
    metrics.inc_span_received();
    let TenantSpan { tenant_id, span } = ts;
    let span_id = span.span_id.clone();
    let now = tokio::time::Instant::now().into_std();
    match buffer.add_at(&tenant_id, span, now) {
        AddOutcome::Buffered => {}
        AddOutcome::Ready(ready) => {
            let evaluator = evaluator.clone();
            inflight.spawn(async move { evaluator.evaluate(ready).await });
        }
        AddOutcome::Rejected(reason) => {
            metrics.inc_span_rejected(&reason);
            tw_debug!(res, tenant = %tenant_id, span_id = %span_id, reason = %reason, "span rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_intake_reports_shutdown() {
        let (tx, rx) = mpsc::channel(1);
        let sender = SpanSender::new(tx);
        drop(rx);
        assert!(sender.is_closed());
        assert!(
            sender
                .send("acme", Span::new("t1", "s1", "db.query"))
                .await
                .is_err()
        );
        assert!(sender.try_send("acme", Span::new("t1", "s2", "db.query")).is_err());
    }

    #[tokio::test]
    async fn full_intake_rejects_without_waiting() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = SpanSender::new(tx);
        sender.try_send("acme", Span::new("t1", "s1", "a.b")).unwrap();
        assert!(sender.try_send("acme", Span::new("t1", "s2", "a.b")).is_err());
        assert!(!sender.is_closed());
    }
}
