pub mod buffer;
pub mod error;
pub mod eval;
pub mod replay;
pub mod span;
pub mod store;
pub mod violation;

pub use buffer::{AddOutcome, ReadyReason, ReadyTrace, RejectReason, TraceBuffer};
pub use error::{CoreError, CoreReason, CoreResult};
pub use eval::{EvalOutcome, EvalStats, Evaluator, SpanBinding, TenantContext};
pub use replay::{
    JsonlTraceSource, MemoryTraceSource, ReplayEngine, ReplayReport, ReplayRequest, RuleSelector,
    TimeRange, TraceSource,
};
pub use span::{AttrValue, Span, SpanKind, SpanStatus, TenantSpan, Trace};
pub use store::{Rule, RuleDefinition, RuleStore, Severity, TenantRules, UpsertOutcome};
pub use violation::{
    FanOutSink, FileViolationSink, MemoryViolationSink, Origin, SinkSet, Violation, ViolationSink,
    build_sinks,
};
