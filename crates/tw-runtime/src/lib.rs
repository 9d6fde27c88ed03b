#[macro_use]
mod log_macros;

pub mod engine;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod metrics;
pub mod replay;
pub mod rule_admin;
mod sweeper_task;
pub mod tracing_init;
mod violation_task;

pub use engine::{BatchReport, TraceEvaluator, TraceViolations};
pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use intake::SpanSender;
pub use lifecycle::Reactor;
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use replay::run_replay;
pub use rule_admin::RuleAdmin;
pub use tracing_init::init_tracing;
