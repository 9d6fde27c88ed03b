use serde::{Deserialize, Serialize};

use super::Span;

/// A span tagged with the tenant that owns it, as delivered by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSpan {
    pub tenant_id: String,
    #[serde(flatten)]
    pub span: Span,
}

impl TenantSpan {
    pub fn new(tenant_id: impl Into<String>, span: Span) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            span,
        }
    }
}

/// The spans of one tenant that share a correlation id.
///
/// `late` marks a trace assembled from spans that arrived after an earlier
/// trace with the same id was already evaluated. Late traces are evaluated
/// on their own and never merged with the earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub tenant_id: String,
    pub trace_id: String,
    pub spans: Vec<Span>,
    pub late: bool,
}

impl Trace {
    pub fn new(tenant_id: impl Into<String>, trace_id: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trace_id: trace_id.into(),
            spans,
            late: false,
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Earliest span start, or 0 for an empty trace.
    pub fn start_nanos(&self) -> i64 {
        self.spans.iter().map(|s| s.start_time_nanos).min().unwrap_or(0)
    }

    /// Latest span end, or 0 for an empty trace.
    pub fn end_nanos(&self) -> i64 {
        self.spans.iter().map(|s| s.end_time_nanos).max().unwrap_or(0)
    }

    pub fn root(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.is_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::AttrValue;

    #[test]
    fn time_bounds_span_the_whole_trace() {
        let trace = Trace::new(
            "acme",
            "t1",
            vec![
                Span::new("t1", "a", "x.y").with_times(200, 900),
                Span::new("t1", "b", "x.z").with_parent("a").with_times(100, 400),
            ],
        );
        assert_eq!(trace.start_nanos(), 100);
        assert_eq!(trace.end_nanos(), 900);
        assert_eq!(trace.root().map(|s| s.span_id.as_str()), Some("a"));
        assert_eq!(Trace::new("acme", "t2", vec![]).end_nanos(), 0);
    }

    #[test]
    fn tenant_span_json_is_flat() {
        let line = r#"{"tenant_id":"acme","trace_id":"t1","span_id":"s1","parent_span_id":"s0",
            "operation_name":"payment.charge","start_time_nanos":1,"end_time_nanos":2000001,
            "status":"error","kind":"server","attributes":{"amount":1500,"currency":"EUR","retry":false}}"#;
        let ts: TenantSpan = serde_json::from_str(line).unwrap();
        assert_eq!(ts.tenant_id, "acme");
        assert!(!ts.span.is_root());
        assert_eq!(ts.span.attributes["amount"], AttrValue::Number(1500.0));
        assert_eq!(ts.span.attributes["currency"], AttrValue::Str("EUR".into()));
        assert_eq!(ts.span.attributes["retry"], AttrValue::Bool(false));
        assert_eq!(ts.span.duration_ms(), 2.0);
    }

    #[test]
    fn empty_parent_is_root() {
        let span = Span::new("t", "s", "op").with_parent("");
        assert!(span.is_root());
    }
}
