use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orion_error::op_context;
use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tw_config::TraceWardenConfig;
use tw_core::{
    MemoryViolationSink, ReplayEngine, ReplayReport, ReplayRequest, RuleStore, TraceBuffer,
    TraceSource, ViolationSink, build_sinks,
};

use crate::engine::{TraceEvaluator, TraceViolations};
use crate::error::{RuntimeReason, RuntimeResult};
use crate::intake::{self, SpanSender};
use crate::metrics::RuntimeMetrics;
use crate::replay::run_replay;
use crate::rule_admin::RuleAdmin;
use crate::sweeper_task;
use crate::violation_task;

// ---------------------------------------------------------------------------
// TaskGroup
// ---------------------------------------------------------------------------

/// Named tasks joined together during shutdown. Groups are started in
/// dependency order and joined in reverse:
///
///   start:  violations → sweeper → intake
///   join:   intake → sweeper → (flush) → violations
struct TaskGroup {
    name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    async fn wait(self) -> RuntimeResult<()> {
        let name = self.name;
        for handle in self.handles {
            handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("{name} task join error: {e}"))
                })?
                .owe(RuntimeReason::Shutdown)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------------

/// The live pipeline: span intake, inactivity sweeping, deadline-bounded
/// evaluation and violation dispatch.
pub struct Reactor {
    intake_cancel: CancellationToken,
    sweeper_cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    buffer: Arc<TraceBuffer>,
    evaluator: Option<TraceEvaluator>,
    spans: SpanSender,
    metrics: Arc<RuntimeMetrics>,
    admin: RuleAdmin,
    replay: Arc<ReplayEngine>,
    memory_sinks: BTreeMap<String, Arc<MemoryViolationSink>>,
}

impl Reactor {
    /// Start the pipeline over an existing rule store, sending violations
    /// to `sink`.
    pub async fn start(
        config: &TraceWardenConfig,
        store: Arc<RuleStore>,
        sink: Arc<dyn ViolationSink>,
    ) -> RuntimeResult<Self> {
        let metrics = Arc::new(RuntimeMetrics::new());
        let buffer = Arc::new(TraceBuffer::new(config.buffer.clone()));
        let intake_cancel = CancellationToken::new();
        let sweeper_cancel = CancellationToken::new();

        let mut groups: Vec<TaskGroup> = Vec::with_capacity(3);

        let (violation_tx, violation_group) = spawn_violation_task(sink, Arc::clone(&metrics));
        groups.push(violation_group);

        let evaluator = TraceEvaluator::new(
            Arc::clone(&store),
            &config.evaluation,
            violation_tx,
            Arc::clone(&metrics),
        );

        groups.push(spawn_sweeper_task(
            config,
            &buffer,
            evaluator.clone(),
            &metrics,
            sweeper_cancel.clone(),
        ));

        let (spans, intake_group) =
            spawn_intake_task(&buffer, evaluator.clone(), &metrics, intake_cancel.clone());
        groups.push(intake_group);

        tw_info!(sys,
            parallelism = config.evaluation.parallelism,
            inactivity = %config.buffer.inactivity_timeout,
            trace_deadline = %config.evaluation.trace_deadline,
            tenants = store.tenants().len(),
            rules = store.rule_count(),
            "reactor started"
        );

        Ok(Self {
            intake_cancel,
            sweeper_cancel,
            groups,
            buffer,
            evaluator: Some(evaluator),
            spans,
            admin: RuleAdmin::new(Arc::clone(&store), Arc::clone(&metrics)),
            replay: Arc::new(ReplayEngine::new(store, config.limits.to_compile_limits())),
            metrics,
            memory_sinks: BTreeMap::new(),
        })
    }

    /// Start with an empty rule store and the sinks named in
    /// `violations.sinks`. Relative sink paths resolve against `base_dir`.
    #[tracing::instrument(name = "reactor.start", skip_all)]
    pub async fn start_from_config(config: &TraceWardenConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let mut op = op_context!("reactor-bootstrap").with_auto_log();
        op.record("base_dir", base_dir.display().to_string().as_str());
        op.record("sinks", config.sinks.len().to_string().as_str());

        let sinks = build_sinks(&config.sinks, base_dir).owe(RuntimeReason::Bootstrap)?;
        let store = Arc::new(RuleStore::new(config.store.clone(), &config.limits));
        let mut reactor = Self::start(config, store, sinks.sink).await?;
        reactor.memory_sinks = sinks.memory;

        op.mark_suc();
        Ok(reactor)
    }

    pub fn span_sender(&self) -> SpanSender {
        self.spans.clone()
    }

    pub fn rules(&self) -> &RuleAdmin {
        &self.admin
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    /// A `memory://<name>` sink from the configuration.
    pub fn memory_sink(&self, name: &str) -> Option<Arc<MemoryViolationSink>> {
        self.memory_sinks.get(name).cloned()
    }

    /// Replay against the reactor's rule store. Replay violations go to the
    /// caller, never to the live sinks.
    pub async fn replay(
        &self,
        req: ReplayRequest,
        source: Arc<dyn TraceSource>,
        deadline: Duration,
    ) -> RuntimeResult<ReplayReport> {
        run_replay(
            Arc::clone(&self.replay),
            req,
            source,
            deadline,
            Some(Arc::clone(&self.metrics)),
        )
        .await
    }

    /// Stop intake, evaluate whatever is still buffered, deliver every
    /// pending violation and join all tasks.
    pub async fn shutdown(mut self) -> RuntimeResult<()> {
        tw_info!(sys, pending = self.buffer.pending_traces(), "initiating graceful shutdown");
        self.intake_cancel.cancel();

        while let Some(group) = self.groups.pop() {
            let name = group.name;
            if name == "violations" {
                self.flush_buffer().await;
            }
            tw_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            tw_debug!(sys, task_group = name, "task group finished");

            if name == "intake" {
                self.sweeper_cancel.cancel();
            }
        }
        tw_info!(sys, summary = %self.metrics.summary_line(), "reactor stopped");
        Ok(())
    }

    /// Evaluate every still-collecting trace, then drop the last evaluator
    /// so the violation channel can close.
    async fn flush_buffer(&mut self) {
        let Some(evaluator) = self.evaluator.take() else {
            return;
        };
        let flushed = self.buffer.flush_all();
        if flushed.is_empty() {
            return;
        }
        let traces = flushed.len();
        let report = evaluator.evaluate_batch(flushed).await;
        tw_info!(sys,
            traces,
            evaluated = report.evaluated,
            violations = report.violations,
            timed_out = report.timed_out,
            "buffer flushed on shutdown"
        );
    }
}

// ---------------------------------------------------------------------------
// task spawn helpers
// ---------------------------------------------------------------------------

fn spawn_violation_task(
    sink: Arc<dyn ViolationSink>,
    metrics: Arc<RuntimeMetrics>,
) -> (mpsc::Sender<TraceViolations>, TaskGroup) {
    let (tx, rx) = mpsc::channel(violation_task::VIOLATION_CHANNEL_CAPACITY);
    let mut group = TaskGroup::new("violations");
    group.push(tokio::spawn(async move {
        violation_task::run_violation_dispatcher(rx, sink, metrics).await;
        Ok(())
    }));
    (tx, group)
}

fn spawn_sweeper_task(
    config: &TraceWardenConfig,
    buffer: &Arc<TraceBuffer>,
    evaluator: TraceEvaluator,
    metrics: &Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> TaskGroup {
    let interval = config.buffer.sweep_interval.as_duration();
    let buffer = Arc::clone(buffer);
    let metrics = Arc::clone(metrics);
    let mut group = TaskGroup::new("sweeper");
    group.push(tokio::spawn(async move {
        sweeper_task::run_sweeper(buffer, evaluator, metrics, interval, cancel).await;
        Ok(())
    }));
    group
}

fn spawn_intake_task(
    buffer: &Arc<TraceBuffer>,
    evaluator: TraceEvaluator,
    metrics: &Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> (SpanSender, TaskGroup) {
    let (tx, rx) = mpsc::channel(intake::SPAN_CHANNEL_CAPACITY);
    let buffer = Arc::clone(buffer);
    let metrics = Arc::clone(metrics);
    let mut group = TaskGroup::new("intake");
    group.push(tokio::spawn(intake::run_intake(
        rx, buffer, evaluator, metrics, cancel,
    )));
    (SpanSender::new(tx), group)
}
