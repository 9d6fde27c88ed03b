use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use orion_error::prelude::*;

use crate::error::{CoreReason, CoreResult};
use crate::span::{TenantSpan, Trace};

use super::TimeRange;

pub type TraceIter<'a> = Box<dyn Iterator<Item = CoreResult<Trace>> + Send + 'a>;

/// Historical trace storage, queried by tenant and time range.
///
/// The range is a hint: a source may deliver traces outside it (for
/// example when its index is coarse) and the replay engine skips them.
/// A source must never deliver another tenant's traces.
pub trait TraceSource: Send + Sync {
    fn traces(&self, tenant_id: &str, range: &TimeRange) -> CoreResult<TraceIter<'_>>;
}

// ---------------------------------------------------------------------------
// MemoryTraceSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSource {
    traces: Vec<Trace>,
}

impl MemoryTraceSource {
    pub fn new(traces: Vec<Trace>) -> Self {
        Self { traces }
    }

    pub fn push(&mut self, trace: Trace) {
        self.traces.push(trace);
    }
}

impl TraceSource for MemoryTraceSource {
    fn traces(&self, tenant_id: &str, _range: &TimeRange) -> CoreResult<TraceIter<'_>> {
        let tenant_id = tenant_id.to_string();
        Ok(Box::new(
            self.traces
                .iter()
                .filter(move |t| t.tenant_id == tenant_id)
                .cloned()
                .map(Ok),
        ))
    }
}

// ---------------------------------------------------------------------------
// JsonlTraceSource
// ---------------------------------------------------------------------------

/// One [`TenantSpan`] per line; spans are grouped into traces by trace id.
/// Blank lines are skipped, a malformed line fails the whole query.
#[derive(Debug, Clone)]
pub struct JsonlTraceSource {
    path: PathBuf,
}

impl JsonlTraceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSource for JsonlTraceSource {
    fn traces(&self, tenant_id: &str, range: &TimeRange) -> CoreResult<TraceIter<'_>> {
        let file = File::open(&self.path).map_err(|e| {
            StructError::from(CoreReason::TraceSource)
                .with_detail(format!("failed to open {}: {e}", self.path.display()))
        })?;
        let at_line = |idx: usize, e: &dyn std::fmt::Display| {
            StructError::from(CoreReason::TraceSource)
                .with_detail(format!("{}:{}: {e}", self.path.display(), idx + 1))
        };

        let mut grouped: BTreeMap<String, Trace> = BTreeMap::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| at_line(idx, &e))?;
            if line.trim().is_empty() {
                continue;
            }
            let ts: TenantSpan = serde_json::from_str(&line).map_err(|e| at_line(idx, &e))?;
            if ts.tenant_id != tenant_id {
                continue;
            }
            grouped
                .entry(ts.span.trace_id.clone())
                .or_insert_with(|| Trace::new(tenant_id, ts.span.trace_id.clone(), Vec::new()))
                .spans
                .push(ts.span);
        }

        let range = *range;
        Ok(Box::new(
            grouped
                .into_values()
                .filter(move |t| range.contains(t.end_nanos()))
                .map(Ok),
        ))
    }
}
