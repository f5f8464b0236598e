use thiserror::Error;

use crate::job::{JobId, JobState};

/// A malformed trigger, recipient or job definition, rejected before it
/// reaches the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `period` must be zero or positive.
    #[error("period must not be negative (got {0})")]
    NegativePeriod(i64),

    /// A zero period only makes sense for a single firing.
    #[error("period of zero requires repeat_count = 0 (got {0})")]
    ZeroPeriodRepeats(i64),

    /// `repeat_count` is `-1` (indefinite) or a non-negative bound.
    #[error("repeat_count must be >= -1 (got {0})")]
    RepeatCountOutOfRange(i64),

    /// `end_time` precedes `start_time`.
    #[error("end_time {end} is before start_time {start}")]
    EndBeforeStart { start: String, end: String },

    /// The trigger cannot produce even its first fire time.
    #[error("trigger produces no fire time")]
    NoFireTime,

    /// Recipient URL missing or not http(s).
    #[error("invalid recipient url {0:?}")]
    InvalidUrl(String),

    /// Header names must be non-empty.
    #[error("empty header name")]
    EmptyHeaderName,

    /// Header name is not an HTTP token, or the value has forbidden bytes.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// Header names must be unique (case-insensitive).
    #[error("duplicate header {0:?}")]
    DuplicateHeader(String),

    /// Job ids must be non-empty.
    #[error("empty job id")]
    EmptyJobId,

    /// Job ids are bounded so they fit a store key.
    #[error("job id longer than {max} bytes (got {len})")]
    JobIdTooLong { len: usize, max: usize },

    /// A job with this id already exists.
    #[error("job {0} already exists")]
    DuplicateJobId(JobId),
}

/// A state machine method was called in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {id}: cannot {action} while {state}")]
pub struct TransitionError {
    pub id: JobId,
    pub state: JobState,
    pub action: &'static str,
}

/// Errors surfaced by the scheduler handle.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// The coordinator task is no longer running.
    #[error("scheduler is not running")]
    Closed,
}
