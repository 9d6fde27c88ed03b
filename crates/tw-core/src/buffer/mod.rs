mod types;


use std::time::Instant;

use dashmap::DashMap;
use tw_config::BufferConfig;

use crate::span::{AttrValue, Span, Trace};

pub use types::{AddOutcome, ReadyReason, ReadyTrace, RejectReason};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct TraceKey {
    tenant_id: String,
    trace_id: String,
}

struct Pending {
    spans: Vec<Span>,
    last_seen: Instant,
    late: bool,
}

// ---------------------------------------------------------------------------
// TraceBuffer
// ---------------------------------------------------------------------------

/// Groups incoming spans by `(tenant, trace id)` until the trace is ready.
///
/// Per trace the state machine is `Collecting -> Ready`: a root span closes
/// the trace immediately, otherwise [`sweep`](Self::sweep) closes it once no
/// span arrived for `inactivity_timeout`. The buffer never retains a trace
/// after handing it out. Spans for an id handed out within `late_marker_ttl`
/// start a new trace tagged `late`; they are never merged into the earlier
/// one.
///
/// State is sharded, so intake of unrelated traces never contends on a
/// single lock.
pub struct TraceBuffer {
    config: BufferConfig,
    traces: DashMap<TraceKey, Pending>,
    flushed: DashMap<TraceKey, Instant>,
}

impl TraceBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let shards = config.shards.max(2).next_power_of_two();
        Self {
            traces: DashMap::with_shard_amount(shards),
            flushed: DashMap::with_shard_amount(shards),
            config,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Traces currently collecting.
    pub fn pending_traces(&self) -> usize {
        self.traces.len()
    }

    pub fn add(&self, tenant_id: &str, span: Span) -> AddOutcome {
        self.add_at(tenant_id, span, Instant::now())
    }

    pub fn add_at(&self, tenant_id: &str, span: Span, now: Instant) -> AddOutcome {
        if let Err(reason) = self.admit(&span) {
            return AddOutcome::Rejected(reason);
        }

        let key = TraceKey {
            tenant_id: tenant_id.to_string(),
            trace_id: span.trace_id.clone(),
        };
        let is_root = span.is_root();
        let max_spans = self.config.max_spans_per_trace;
        {
            let mut pending = self.traces.entry(key.clone()).or_insert_with(|| Pending {
                spans: Vec::new(),
                last_seen: now,
                late: self.recently_flushed(&key, now),
            });
            if pending.spans.len() >= max_spans {
                return AddOutcome::Rejected(RejectReason::TooManySpans { max: max_spans });
            }
            pending.spans.push(span);
            pending.last_seen = now;
        }

        if is_root
            && let Some((key, pending)) = self.traces.remove(&key)
        {
            return AddOutcome::Ready(self.finish(key, pending, ReadyReason::Root, now));
        }
        AddOutcome::Buffered
    }

    pub fn sweep(&self) -> Vec<ReadyTrace> {
        self.sweep_at(Instant::now())
    }

    /// Close every trace idle for at least `inactivity_timeout`, and forget
    /// late markers older than `late_marker_ttl`.
    pub fn sweep_at(&self, now: Instant) -> Vec<ReadyTrace> {
        let timeout = self.config.inactivity_timeout.as_duration();
        let idle = |p: &Pending| now.saturating_duration_since(p.last_seen) >= timeout;

        let mut expired: Vec<TraceKey> = self
            .traces
            .iter()
            .filter(|e| idle(e.value()))
            .map(|e| e.key().clone())
            .collect();
        expired.sort();

        let mut ready = Vec::with_capacity(expired.len());
        for key in expired {
            // a span may have arrived since the scan
            if let Some((key, pending)) = self.traces.remove_if(&key, |_, p| idle(p)) {
                ready.push(self.finish(key, pending, ReadyReason::Inactivity, now));
            }
        }

        let ttl = self.config.late_marker_ttl.as_duration();
        self.flushed
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);
        ready
    }

    /// Drain every collecting trace regardless of age.
    pub fn flush_all(&self) -> Vec<ReadyTrace> {
        let now = Instant::now();
        let mut keys: Vec<TraceKey> = self.traces.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.traces.remove(&key))
            .map(|(key, pending)| self.finish(key, pending, ReadyReason::Flush, now))
            .collect()
    }

    fn finish(&self, key: TraceKey, pending: Pending, reason: ReadyReason, now: Instant) -> ReadyTrace {
        self.flushed.insert(key.clone(), now);
        let mut trace = Trace::new(key.tenant_id, key.trace_id, pending.spans);
        trace.late = pending.late;
        if trace.late {
            log::debug!(
                "late trace {} ({} spans) evaluated separately",
                trace.trace_id,
                trace.len()
            );
        }
        ReadyTrace { trace, reason }
    }

    fn recently_flushed(&self, key: &TraceKey, now: Instant) -> bool {
        let ttl = self.config.late_marker_ttl.as_duration();
        self.flushed
            .get(key)
            .is_some_and(|at| now.saturating_duration_since(*at) < ttl)
    }

    fn admit(&self, span: &Span) -> Result<(), RejectReason> {
        let max_attrs = self.config.max_attributes_per_span;
        if span.attributes.len() > max_attrs {
            return Err(RejectReason::TooManyAttributes {
                count: span.attributes.len(),
                max: max_attrs,
            });
        }
        let max_bytes = self.config.max_attribute_value_bytes.as_bytes();
        for (key, value) in &span.attributes {
            if let AttrValue::Str(s) = value
                && s.len() > max_bytes
            {
                return Err(RejectReason::AttributeTooLarge {
                    key: key.clone(),
                    bytes: s.len(),
                    max: max_bytes,
                });
            }
        }
        Ok(())
    }
}
