use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TransitionError, ValidationError};
use crate::invoker::{Outcome, Verdict};
use crate::recipient::Recipient;
use crate::response::JobExecutionResponse;
use crate::retry::RetryPolicy;
use crate::trigger::{Trigger, TriggerSpec};

/// Caller- or system-assigned job identifier.
pub type JobId = String;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting for the next fire time.
    Scheduled,
    /// A dispatch attempt is in progress.
    Firing,
    /// The last attempt failed; another is scheduled after a backoff.
    Retrying,
    /// Trigger exhausted and the last firing succeeded.
    Executed,
    /// Canceled by request.
    Canceled,
    /// Retries exhausted or fatal dispatch failure.
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Executed | JobState::Canceled | JobState::Error)
    }

    /// Waiting in the due-time index.
    pub fn is_waiting(&self) -> bool {
        matches!(self, JobState::Scheduled | JobState::Retrying)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Scheduled => "SCHEDULED",
            JobState::Firing => "FIRING",
            JobState::Retrying => "RETRYING",
            JobState::Executed => "EXECUTED",
            JobState::Canceled => "CANCELED",
            JobState::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(JobState::Scheduled),
            "FIRING" => Ok(JobState::Firing),
            "RETRYING" => Ok(JobState::Retrying),
            "EXECUTED" => Ok(JobState::Executed),
            "CANCELED" => Ok(JobState::Canceled),
            "ERROR" => Ok(JobState::Error),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Creation request, as accepted from a management layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Generated (UUID v4) when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    pub trigger: TriggerSpec,
    pub recipient: Recipient,
    /// Higher fires first among jobs due at the same instant.
    #[serde(default)]
    pub priority: i32,
}

/// Answer to a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Accepted. A firing job switches to `CANCELED` once its attempt is recorded.
    Canceled,
    /// Nothing to do; the job already finished.
    AlreadyTerminal,
    NotFound,
}

/// Read-only view for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub attempt: u32,
    pub last_response: Option<JobExecutionResponse>,
    pub next_due: Option<DateTime<Utc>>,
    pub current_repeat_count: i64,
    pub cancel_requested: bool,
    pub priority: i32,
}

/// A trigger bound to a recipient, plus its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    trigger: Trigger,
    recipient: Recipient,
    priority: i32,
    state: JobState,
    /// Failed attempts of the current firing.
    attempt: u32,
    last_response: Option<JobExecutionResponse>,
    next_due: Option<DateTime<Utc>>,
    /// Trigger occurrence being served; kept across retries.
    fire_time: Option<DateTime<FixedOffset>>,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Longest caller-assigned id, in bytes. Ids become store keys.
pub const MAX_JOB_ID_LEN: usize = 100;

impl Job {
    /// Validate the request and seed the first fire time.
    pub fn create(new: NewJob, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let id = new.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(ValidationError::JobIdTooLong { len: id.len(), max: MAX_JOB_ID_LEN });
        }
        new.recipient.validate()?;
        let mut trigger = new.trigger.build()?;
        let first = trigger.next_fire_time().ok_or(ValidationError::NoFireTime)?;

        Ok(Self {
            id,
            trigger,
            recipient: new.recipient,
            priority: new.priority,
            state: JobState::Scheduled,
            attempt: 0,
            last_response: None,
            next_due: Some(first.with_timezone(&Utc)),
            fire_time: Some(first),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_response(&self) -> Option<&JobExecutionResponse> {
        self.last_response.as_ref()
    }

    /// When the job next wants to fire; `None` once terminal.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    pub fn fire_time(&self) -> Option<DateTime<FixedOffset>> {
        self.fire_time
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            state: self.state,
            attempt: self.attempt,
            last_response: self.last_response.clone(),
            next_due: self.next_due,
            current_repeat_count: self.trigger.current_repeat_count(),
            cancel_requested: self.cancel_requested,
            priority: self.priority,
        }
    }

    fn refuse(&self, action: &'static str) -> TransitionError {
        TransitionError { id: self.id.clone(), state: self.state, action }
    }

    /// `SCHEDULED`/`RETRYING` -> `FIRING`.
    pub fn begin_firing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.is_waiting() {
            return Err(self.refuse("fire"));
        }
        self.state = JobState::Firing;
        self.updated_at = now;
        Ok(())
    }

    /// Apply the result of the attempt started by [`begin_firing`](Self::begin_firing).
    ///
    /// Success resets `attempt` and advances the trigger. Failure bumps
    /// `attempt` and asks the policy for a retry; retries never consume a
    /// trigger occurrence and may run past the trigger's end time, which
    /// only bounds new occurrences.
    /// A pending cancellation wins over both, after the response is stored.
    pub fn record_outcome(
        &mut self,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobState, TransitionError> {
        if self.state != JobState::Firing {
            return Err(self.refuse("record an outcome"));
        }
        self.last_response = Some(outcome.response.clone());
        self.updated_at = now;

        match &outcome.verdict {
            Verdict::Success => {
                self.attempt = 0;
                if self.cancel_requested {
                    self.finish(JobState::Canceled);
                } else if let Some(next) = self.trigger.next_fire_time() {
                    self.state = JobState::Scheduled;
                    self.fire_time = Some(next);
                    self.next_due = Some(next.with_timezone(&Utc));
                } else {
                    self.finish(JobState::Executed);
                }
            }
            Verdict::Failure(kind) => {
                self.attempt = self.attempt.saturating_add(1);
                let retry_at = policy
                    .should_retry(self.attempt, kind)
                    .and_then(|delay| TimeDelta::from_std(delay).ok())
                    .and_then(|delay| now.checked_add_signed(delay));

                if self.cancel_requested {
                    self.finish(JobState::Canceled);
                } else if let Some(due) = retry_at {
                    self.state = JobState::Retrying;
                    self.next_due = Some(due);
                } else {
                    self.finish(JobState::Error);
                }
            }
        }
        Ok(self.state)
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.next_due = None;
        self.cancel_requested = false;
    }

    /// Waiting jobs cancel at once; a firing job is flagged and cancels when
    /// its outcome is recorded.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CancelOutcome {
        match self.state {
            s if s.is_terminal() => return CancelOutcome::AlreadyTerminal,
            JobState::Firing => self.cancel_requested = true,
            _ => self.finish(JobState::Canceled),
        }
        self.updated_at = now;
        CancelOutcome::Canceled
    }

    /// Re-arm a job persisted as `FIRING` by a process that died mid-dispatch.
    /// The lost attempt is repeated without consuming a trigger occurrence.
    pub fn recover(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != JobState::Firing {
            return false;
        }
        if self.cancel_requested {
            self.finish(JobState::Canceled);
        } else {
            self.state = JobState::Retrying;
            self.next_due = Some(now);
        }
        self.updated_at = now;
        true
    }
}
