mod sink;

use std::fmt;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::eval::{EvalOutcome, SpanBinding};
use crate::span::Trace;
use crate::store::{Rule, Severity};

pub use sink::{
    FanOutSink, FileViolationSink, MemoryViolationSink, SinkSet, ViolationSink, build_sinks,
};

/// Where a violation was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Replay,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Live => "live",
            Origin::Replay => "replay",
        })
    }
}

/// A rule match on one trace. Plain data, handed to sinks as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: String,
    pub rule_id: String,
    pub rule_revision: u64,
    pub tenant_id: String,
    pub trace_id: String,
    pub severity: Severity,
    pub span_ids: Vec<String>,
    pub bindings: Vec<SpanBinding>,
    /// Latest span end of the trace, so replayed violations carry the time
    /// they actually happened.
    pub occurred_at_nanos: i64,
    pub occurred_at: String,
    pub origin: Origin,
    #[serde(default)]
    pub late: bool,
}

impl Violation {
    pub fn from_match(rule: &Rule, trace: &Trace, outcome: EvalOutcome, origin: Origin) -> Self {
        let occurred_at_nanos = trace.end_nanos();
        Self {
            violation_id: violation_id(&rule.tenant_id, &rule.id, rule.revision, &trace.trace_id),
            rule_id: rule.id.clone(),
            rule_revision: rule.revision,
            tenant_id: rule.tenant_id.clone(),
            trace_id: trace.trace_id.clone(),
            severity: rule.severity,
            span_ids: outcome.span_ids,
            bindings: outcome.bindings,
            occurred_at_nanos,
            occurred_at: format_nanos_utc(occurred_at_nanos),
            origin,
            late: trace.late,
        }
    }
}

/// First 16 hex chars of SHA-256 over `tenant|rule|revision|trace`. The id
/// does not depend on when or how the match was found.
pub fn violation_id(tenant_id: &str, rule_id: &str, revision: u64, trace_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(rule_id.as_bytes());
    hasher.update(b"|");
    hasher.update(revision.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trace_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// RFC 3339 UTC with nanosecond precision.
pub fn format_nanos_utc(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Nanos, true)
}
