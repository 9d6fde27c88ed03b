use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("rule compile error")]
    RuleCompile,
    #[error("rule store error")]
    RuleStore,
    #[error("evaluation error")]
    Evaluation,
    #[error("replay error")]
    Replay,
    #[error("trace source error")]
    TraceSource,
    #[error("violation sink error")]
    ViolationSink,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::RuleCompile => 3001,
            Self::RuleStore => 3002,
            Self::Evaluation => 3003,
            Self::Replay => 3004,
            Self::TraceSource => 3005,
            Self::ViolationSink => 3006,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
