use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// `[evaluation]`: live evaluation deadlines and concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Budget for evaluating one trace against a tenant's active rules.
    pub trace_deadline: HumanDuration,
    /// Budget for one sweep batch of inactivity-ready traces.
    pub batch_deadline: HumanDuration,
    /// Upper bound on concurrent trace evaluations (semaphore permits).
    pub parallelism: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            trace_deadline: HumanDuration::from_secs(5),
            batch_deadline: HumanDuration::from_secs(10),
            parallelism: 8,
        }
    }
}
