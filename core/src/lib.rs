//! cadence_core: recurrence triggers, the job state machine and the dispatch
//! coordinator, plus shared building blocks (config, KV, logging).

/// Configuration helpers (AppId, dirs, load_or_init, etc.)
pub mod cfg;
/// Simple file-backed KV store and the job store built on it.
pub mod store;
/// Tracing/log initialization helpers.
pub mod logx;
/// Typed errors for validation, transitions and the scheduler handle.
pub mod error;
/// Injected time source.
pub mod clock;
/// Recurrence arithmetic: fire times from a trigger description.
pub mod trigger;
/// Delivery targets and their payloads.
pub mod recipient;
/// Per-attempt outcome records.
pub mod response;
/// Retry/backoff policy for a single firing.
pub mod retry;
/// Job aggregate and lifecycle state machine.
pub mod job;
/// Transport dispatch table with timeouts.
pub mod invoker;
/// Coordinator task and its handle.
pub mod scheduler;

#[cfg(test)]
mod testkit;

pub use error::{SchedError, TransitionError, ValidationError};
pub use job::{CancelOutcome, Job, JobId, JobSnapshot, JobState, NewJob};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerSettings};
pub use trigger::{PeriodUnit, Trigger, TriggerSpec};
