use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tw_core::{ReadyReason, RejectReason};
use tw_lang::ErrorCategory;

const EVAL_BUCKETS_SECONDS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const REJECT_LABELS: [&str; 3] = ["too_many_spans", "too_many_attributes", "attribute_too_large"];
const READY_LABELS: [&str; 3] = ["root", "inactivity", "flush"];
const CATEGORY_LABELS: [&str; 4] = [
    "syntax_error",
    "parse_timeout",
    "recursion_limit_exceeded",
    "size_limit_exceeded",
];

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Fixed-bucket histogram. One observation increments exactly one bucket;
/// rendering accumulates.
struct Histogram {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn from_seconds_bounds(bounds: &[f64]) -> Self {
        let upper_bounds_nanos: Vec<u64> = bounds
            .iter()
            .map(|sec| (*sec * 1_000_000_000.0) as u64)
            .collect();
        let bucket_counts = (0..=upper_bounds_nanos.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            upper_bounds_nanos,
            bucket_counts,
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        let idx = self
            .upper_bounds_nanos
            .partition_point(|bound| *bound < nanos);
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.bucket_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// RuntimeMetrics
// ---------------------------------------------------------------------------

/// Counters for the live pipeline. Every update is a relaxed atomic add;
/// label sets are closed enums, so nothing allocates on the hot path.
pub struct RuntimeMetrics {
    spans_received: AtomicU64,
    spans_rejected: [AtomicU64; 3],
    traces_ready: [AtomicU64; 3],
    late_traces: AtomicU64,
    pending_traces: AtomicU64,

    trace_evaluations: AtomicU64,
    evaluation_timeouts: AtomicU64,
    batch_timeouts: AtomicU64,
    rule_matches: AtomicU64,

    violations_emitted: AtomicU64,
    violation_sink_errors: AtomicU64,
    violation_channel_send_failed: AtomicU64,

    rules_rejected: [AtomicU64; 4],
    replays: AtomicU64,

    trace_evaluation_seconds: Histogram,
    violation_dispatch_seconds: Histogram,
}

/// Point-in-time copy of the counters, for tests and summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub spans_received: u64,
    pub spans_rejected: u64,
    pub traces_ready: u64,
    pub late_traces: u64,
    pub pending_traces: u64,
    pub trace_evaluations: u64,
    pub evaluation_timeouts: u64,
    pub batch_timeouts: u64,
    pub rule_matches: u64,
    pub violations_emitted: u64,
    pub violation_sink_errors: u64,
    pub violation_channel_send_failed: u64,
    pub rules_rejected: u64,
    pub replays: u64,
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            spans_received: AtomicU64::new(0),
            spans_rejected: Default::default(),
            traces_ready: Default::default(),
            late_traces: AtomicU64::new(0),
            pending_traces: AtomicU64::new(0),
            trace_evaluations: AtomicU64::new(0),
            evaluation_timeouts: AtomicU64::new(0),
            batch_timeouts: AtomicU64::new(0),
            rule_matches: AtomicU64::new(0),
            violations_emitted: AtomicU64::new(0),
            violation_sink_errors: AtomicU64::new(0),
            violation_channel_send_failed: AtomicU64::new(0),
            rules_rejected: Default::default(),
            replays: AtomicU64::new(0),
            trace_evaluation_seconds: Histogram::from_seconds_bounds(EVAL_BUCKETS_SECONDS),
            violation_dispatch_seconds: Histogram::from_seconds_bounds(EVAL_BUCKETS_SECONDS),
        }
    }

    pub fn inc_span_received(&self) {
        self.spans_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_span_rejected(&self, reason: &RejectReason) {
        let idx = match reason {
            RejectReason::TooManySpans { .. } => 0,
            RejectReason::TooManyAttributes { .. } => 1,
            RejectReason::AttributeTooLarge { .. } => 2,
        };
        self.spans_rejected[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trace_ready(&self, reason: ReadyReason, late: bool) {
        let idx = match reason {
            ReadyReason::Root => 0,
            ReadyReason::Inactivity => 1,
            ReadyReason::Flush => 2,
        };
        self.traces_ready[idx].fetch_add(1, Ordering::Relaxed);
        if late {
            self.late_traces.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_pending_traces(&self, pending: usize) {
        self.pending_traces.store(pending as u64, Ordering::Relaxed);
    }

    pub fn observe_trace_evaluation(&self, elapsed: Duration, matches: usize) {
        self.trace_evaluations.fetch_add(1, Ordering::Relaxed);
        self.rule_matches.fetch_add(matches as u64, Ordering::Relaxed);
        self.trace_evaluation_seconds.observe(elapsed);
    }

    pub fn inc_evaluation_timeout(&self) {
        self.evaluation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batch_timeout(&self) {
        self.batch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_violation_channel_send_failed(&self) {
        self.violation_channel_send_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_violation_dispatch(&self, elapsed: Duration, ok: bool) {
        if ok {
            self.violations_emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.violation_sink_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.violation_dispatch_seconds.observe(elapsed);
    }

    pub fn inc_rule_rejected(&self, category: ErrorCategory) {
        let idx = match category {
            ErrorCategory::SyntaxError => 0,
            ErrorCategory::ParseTimeout => 1,
            ErrorCategory::RecursionLimitExceeded => 2,
            ErrorCategory::SizeLimitExceeded => 3,
        };
        self.rules_rejected[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let sum = |vs: &[AtomicU64]| -> u64 { vs.iter().map(load).sum() };
        MetricsSnapshot {
            spans_received: load(&self.spans_received),
            spans_rejected: sum(&self.spans_rejected),
            traces_ready: sum(&self.traces_ready),
            late_traces: load(&self.late_traces),
            pending_traces: load(&self.pending_traces),
            trace_evaluations: load(&self.trace_evaluations),
            evaluation_timeouts: load(&self.evaluation_timeouts),
            batch_timeouts: load(&self.batch_timeouts),
            rule_matches: load(&self.rule_matches),
            violations_emitted: load(&self.violations_emitted),
            violation_sink_errors: load(&self.violation_sink_errors),
            violation_channel_send_failed: load(&self.violation_channel_send_failed),
            rules_rejected: sum(&self.rules_rejected),
            replays: load(&self.replays),
        }
    }

    /// Prometheus text exposition (format 0.0.4).
    pub fn render(&self) -> String {
        let mut out = Exposition::default();
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);

        out.counter("tw_spans_received_total", &[], load(&self.spans_received));
        for (label, value) in REJECT_LABELS.iter().zip(&self.spans_rejected) {
            out.counter("tw_spans_rejected_total", &[("reason", label)], load(value));
        }
        for (label, value) in READY_LABELS.iter().zip(&self.traces_ready) {
            out.counter("tw_traces_ready_total", &[("reason", label)], load(value));
        }
        out.counter("tw_late_traces_total", &[], load(&self.late_traces));
        out.gauge("tw_buffer_pending_traces", load(&self.pending_traces));

        out.counter("tw_trace_evaluations_total", &[], load(&self.trace_evaluations));
        out.counter("tw_evaluation_timeouts_total", &[], load(&self.evaluation_timeouts));
        out.counter("tw_batch_timeouts_total", &[], load(&self.batch_timeouts));
        out.counter("tw_rule_matches_total", &[], load(&self.rule_matches));
        out.histogram("tw_trace_evaluation_seconds", &self.trace_evaluation_seconds);

        out.counter("tw_violations_emitted_total", &[], load(&self.violations_emitted));
        out.counter("tw_violation_sink_errors_total", &[], load(&self.violation_sink_errors));
        out.counter(
            "tw_violation_channel_send_failed_total",
            &[],
            load(&self.violation_channel_send_failed),
        );
        out.histogram("tw_violation_dispatch_seconds", &self.violation_dispatch_seconds);

        for (label, value) in CATEGORY_LABELS.iter().zip(&self.rules_rejected) {
            out.counter("tw_rules_rejected_total", &[("category", label)], load(value));
        }
        out.counter("tw_replays_total", &[], load(&self.replays));
        out.text
    }

    /// One-line digest for periodic INFO logging.
    pub fn summary_line(&self) -> String {
        let s = self.snapshot();
        format!(
            "spans={} rejected={} traces={} late={} pending={} timeouts={} violations={} sink_errors={}",
            s.spans_received,
            s.spans_rejected,
            s.traces_ready,
            s.late_traces,
            s.pending_traces,
            s.evaluation_timeouts + s.batch_timeouts,
            s.violations_emitted,
            s.violation_sink_errors
        )
    }
}

// ---------------------------------------------------------------------------
// Exposition
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Exposition {
    text: String,
    typed: BTreeSet<&'static str>,
}

impl Exposition {
    fn type_once(&mut self, name: &'static str, kind: &str) {
        if self.typed.insert(name) {
            let _ = writeln!(self.text, "# TYPE {name} {kind}");
        }
    }

    fn counter(&mut self, name: &'static str, labels: &[(&str, &str)], value: u64) {
        self.type_once(name, "counter");
        let _ = writeln!(self.text, "{name}{} {value}", format_labels(labels));
    }

    fn gauge(&mut self, name: &'static str, value: u64) {
        self.type_once(name, "gauge");
        let _ = writeln!(self.text, "{name} {value}");
    }

    fn histogram(&mut self, name: &'static str, histogram: &Histogram) {
        self.type_once(name, "histogram");
        let mut cumulative = 0u64;
        for (bound, count) in histogram
            .upper_bounds_nanos
            .iter()
            .zip(&histogram.bucket_counts)
        {
            cumulative += count.load(Ordering::Relaxed);
            let le = format!("{:.6}", *bound as f64 / 1_000_000_000.0);
            let _ = writeln!(
                self.text,
                "{name}_bucket{} {cumulative}",
                format_labels(&[("le", le.as_str())])
            );
        }
        let total = histogram.count();
        let _ = writeln!(self.text, "{name}_bucket{{le=\"+Inf\"}} {total}");
        let sum = histogram.sum_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0;
        let _ = writeln!(self.text, "{name}_sum {sum}");
        let _ = writeln!(self.text, "{name}_count {total}");
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        let _ = write!(out, "{key}=\"");
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}
