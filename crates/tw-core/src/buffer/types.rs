use std::fmt;

use crate::span::Trace;

/// Why a trace left the `Collecting` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyReason {
    /// A span without a parent arrived.
    Root,
    /// No span arrived for the inactivity timeout.
    Inactivity,
    /// Drained on shutdown.
    Flush,
}

impl ReadyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyReason::Root => "root",
            ReadyReason::Inactivity => "inactivity",
            ReadyReason::Flush => "flush",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyTrace {
    pub trace: Trace,
    pub reason: ReadyReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TooManySpans { max: usize },
    TooManyAttributes { count: usize, max: usize },
    AttributeTooLarge { key: String, bytes: usize, max: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooManySpans { max } => {
                write!(f, "trace already holds the maximum of {max} spans")
            }
            RejectReason::TooManyAttributes { count, max } => {
                write!(f, "span has {count} attributes, the limit is {max}")
            }
            RejectReason::AttributeTooLarge { key, bytes, max } => {
                write!(f, "attribute {key:?} is {bytes} bytes, the limit is {max}")
            }
        }
    }
}

/// Result of offering one span to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Buffered,
    /// The span closed its trace, which is handed back for evaluation.
    Ready(ReadyTrace),
    Rejected(RejectReason),
}
