//! The coordinator: one task that owns the due-time index of every live job.
//!
//! A job fires by moving out of the coordinator into a worker task, so only
//! one attempt per job can be in flight. The coordinator keeps a snapshot in
//! its place (and any cancellation that arrives meanwhile), and takes the job
//! back when the worker reports the outcome.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{SchedError, ValidationError};
use crate::invoker::{Outcome, RecipientInvoker};
use crate::job::{CancelOutcome, Job, JobId, JobSnapshot, NewJob};
use crate::response::JobExecutionResponse;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

/// Idle wake-up when nothing is queued.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Tunables for the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Dispatch attempts running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Capacity of the management command queue.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Responses buffered per subscriber before it starts lagging.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_concurrency() -> usize { 8 }
fn default_command_buffer() -> usize { 64 }
fn default_event_buffer() -> usize { 256 }

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryPolicy::default(),
            command_buffer: default_command_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

enum Command {
    Create { job: Job, reply: oneshot::Sender<Result<JobId, SchedError>> },
    Cancel { id: JobId, reply: oneshot::Sender<Result<CancelOutcome, SchedError>> },
    Status { id: JobId, reply: oneshot::Sender<Result<JobSnapshot, SchedError>> },
}

/// A worker handing its job back.
struct Completed {
    job: Job,
    outcome: Outcome,
}

/// Heap entry. The heap is a max-heap, so "greater" means "fires sooner":
/// earlier due time, then higher priority, then smaller id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DueEntry {
    at: DateTime<Utc>,
    priority: i32,
    id: JobId,
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Slot {
    /// Owned by the coordinator: waiting, or terminal but not yet persisted.
    Held(Job),
    /// Moved to a worker.
    InFlight(JobSnapshot),
}

/// Cloneable front door to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<JobExecutionResponse>,
    clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    /// Validate and register a job. Invalid definitions are rejected here and
    /// never reach the coordinator.
    pub async fn create(&self, new: NewJob) -> Result<JobId, SchedError> {
        let job = Job::create(new, self.clock.now())?;
        self.request(|reply| Command::Create { job, reply }).await
    }

    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, SchedError> {
        let id = id.to_string();
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    pub async fn status(&self, id: &str) -> Result<JobSnapshot, SchedError> {
        let id = id.to_string();
        self.request(|reply| Command::Status { id, reply }).await
    }

    /// One [`JobExecutionResponse`] per dispatch attempt, for audit.
    pub fn subscribe(&self) -> broadcast::Receiver<JobExecutionResponse> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SchedError>>) -> Command,
    ) -> Result<T, SchedError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| SchedError::Closed)?;
        rx.await.map_err(|_| SchedError::Closed)?
    }
}

/// Scheduler ready to be spawned.
pub struct Scheduler<S: JobStore> {
    store: S,
    invoker: RecipientInvoker,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl<S: JobStore> Scheduler<S> {
    pub fn new(store: S, invoker: RecipientInvoker, clock: Arc<dyn Clock>, settings: SchedulerSettings) -> Self {
        Self { store, invoker, clock, settings }
    }

    /// Reload live jobs from the store and start the coordinator task.
    /// The task stops when `shutdown` turns `true` or its sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Result<(SchedulerHandle, JoinHandle<()>)> {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.settings.command_buffer.max(1));
        let (events, _) = broadcast::channel(self.settings.event_buffer.max(1));
        let clock = self.clock.clone();

        let mut coordinator = self.into_coordinator(cmd_rx, events.clone());
        coordinator.recover()?;

        let handle = SchedulerHandle { cmd_tx, events, clock };
        let task = tokio::spawn(coordinator.run(shutdown));
        Ok((handle, task))
    }

    fn into_coordinator(
        self,
        cmd_rx: mpsc::Receiver<Command>,
        events: broadcast::Sender<JobExecutionResponse>,
    ) -> Coordinator<S> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Coordinator {
            store: self.store,
            invoker: Arc::new(self.invoker),
            clock: self.clock,
            policy: self.settings.retry,
            queue: BinaryHeap::new(),
            slots: HashMap::new(),
            permits: Arc::new(Semaphore::new(self.settings.max_concurrency.max(1))),
            done_tx,
            done_rx,
            cmd_rx,
            events,
        }
    }
}

struct Coordinator<S: JobStore> {
    store: S,
    invoker: Arc<RecipientInvoker>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    queue: BinaryHeap<DueEntry>,
    slots: HashMap<JobId, Slot>,
    permits: Arc<Semaphore>,
    done_tx: mpsc::UnboundedSender<Completed>,
    done_rx: mpsc::UnboundedReceiver<Completed>,
    cmd_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<JobExecutionResponse>,
}

impl<S: JobStore> Coordinator<S> {
    fn recover(&mut self) -> Result<()> {
        let now = self.clock.now();
        for mut job in self.store.list_due(DateTime::<Utc>::MAX_UTC)? {
            if job.recover(now) {
                warn!(job_id = %job.id(), "job was firing at shutdown; retrying");
                self.store.save(&job)?;
            }
            self.enqueue(job);
        }
        if !self.slots.is_empty() {
            info!(jobs = self.slots.len(), "recovered jobs from store");
        }
        Ok(())
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler started");
        loop {
            let wake = self.next_wake();
            let sleep = tokio::time::sleep(wake.unwrap_or(IDLE_WAKE));

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(in_flight = self.in_flight(), "scheduler stopping");
                        break;
                    }
                }
                Some(done) = self.done_rx.recv() => self.on_completed(done),
                Some(cmd) = self.cmd_rx.recv() => self.on_command(cmd),
                _ = sleep, if wake.is_some() => self.fire_due(),
            }
        }
    }

    /// Time until the earliest entry is due. `None` while all permits are in
    /// use; a finishing worker wakes the loop instead.
    fn next_wake(&self) -> Option<Duration> {
        if self.permits.available_permits() == 0 {
            return None;
        }
        let top = self.queue.peek()?;
        Some((top.at - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn in_flight(&self) -> usize {
        self.slots.values().filter(|s| matches!(s, Slot::InFlight(_))).count()
    }

    fn fire_due(&mut self) {
        let now = self.clock.now();
        while self.queue.peek().is_some_and(|top| top.at <= now) {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                debug!("dispatch pool saturated");
                break;
            };
            let Some(entry) = self.queue.pop() else { break };
            self.dispatch(entry, permit, now);
        }
    }

    fn dispatch(&mut self, entry: DueEntry, permit: OwnedSemaphorePermit, now: DateTime<Utc>) {
        // Entries go stale when a job is rescheduled, canceled or already firing.
        let fresh = matches!(
            self.slots.get(&entry.id),
            Some(Slot::Held(job)) if job.state().is_waiting() && job.next_due() == Some(entry.at)
        );
        if !fresh {
            return;
        }
        let Some(Slot::Held(mut job)) = self.slots.remove(&entry.id) else { return };

        if let Err(e) = job.begin_firing(now) {
            warn!("{e}");
            self.slots.insert(entry.id, Slot::Held(job));
            return;
        }
        if let Err(e) = self.store.save(&job) {
            error!(job_id = %entry.id, "persist firing state failed: {e:#}");
        }
        debug!(job_id = %entry.id, attempt = job.attempt(), "firing");
        self.slots.insert(entry.id, Slot::InFlight(job.snapshot()));

        let invoker = self.invoker.clone();
        let events = self.events.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = invoker.invoke(job.recipient(), job.id()).await;
            let _ = events.send(outcome.response.clone());
            // Release before reporting so the coordinator sees the free permit.
            drop(permit);
            let _ = done_tx.send(Completed { job, outcome });
        });
    }

    fn on_completed(&mut self, Completed { mut job, outcome }: Completed) {
        let now = self.clock.now();
        if let Some(Slot::InFlight(snap)) = self.slots.get(job.id()) {
            if snap.cancel_requested {
                job.cancel(now);
            }
        }
        match job.record_outcome(&outcome, &self.policy, now) {
            Ok(state) => info!(
                job_id = %job.id(),
                code = outcome.response.code,
                attempt = job.attempt(),
                state = %state,
                "dispatch recorded"
            ),
            Err(e) => error!("{e}"),
        }
        self.commit(job);
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Create { job, reply } => {
                let _ = reply.send(self.create(job));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id));
            }
            Command::Status { id, reply } => {
                let _ = reply.send(self.status(&id));
            }
        }
    }

    fn create(&mut self, job: Job) -> Result<JobId, SchedError> {
        let id = job.id().to_string();
        if self.slots.contains_key(&id) || self.store.load(&id)?.is_some() {
            return Err(ValidationError::DuplicateJobId(id).into());
        }
        self.store.save(&job)?;
        info!(job_id = %id, due = ?job.next_due(), priority = job.priority(), "job created");
        self.enqueue(job);
        Ok(id)
    }

    fn cancel(&mut self, id: &str) -> Result<CancelOutcome, SchedError> {
        let now = self.clock.now();
        match self.slots.remove(id) {
            Some(Slot::Held(mut job)) => {
                let outcome = job.cancel(now);
                info!(job_id = %id, ?outcome, "cancel requested");
                if job.state().is_terminal() {
                    self.queue.retain(|e| e.id != id);
                }
                self.commit(job);
                Ok(outcome)
            }
            Some(Slot::InFlight(mut snap)) => {
                info!(job_id = %id, "cancel requested while firing; deferred");
                snap.cancel_requested = true;
                self.slots.insert(id.to_string(), Slot::InFlight(snap));
                self.persist_cancel_request(id, now);
                Ok(CancelOutcome::Canceled)
            }
            None => match self.store.load(id)? {
                Some(job) if job.state().is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
                _ => Ok(CancelOutcome::NotFound),
            },
        }
    }

    /// Flag the stored copy of a firing job so a restart mid-dispatch
    /// cancels it instead of re-arming it.
    fn persist_cancel_request(&self, id: &str, now: DateTime<Utc>) {
        let result = self.store.load(id).and_then(|stored| match stored {
            Some(mut job) => {
                job.cancel(now);
                self.store.save(&job)
            }
            None => Ok(()),
        });
        if let Err(e) = result {
            error!(job_id = %id, "persist cancel request failed: {e:#}");
        }
    }

    fn status(&self, id: &str) -> Result<JobSnapshot, SchedError> {
        match self.slots.get(id) {
            Some(Slot::Held(job)) => Ok(job.snapshot()),
            Some(Slot::InFlight(snap)) => Ok(snap.clone()),
            None => self
                .store
                .load(id)?
                .map(|job| job.snapshot())
                .ok_or_else(|| SchedError::NotFound(id.to_string())),
        }
    }

    /// Persist, then index. Terminal jobs leave memory once they are durable.
    fn commit(&mut self, job: Job) {
        match self.store.save(&job) {
            Ok(()) => self.enqueue(job),
            Err(e) => {
                error!(job_id = %job.id(), "persist failed: {e:#}");
                let id = job.id().to_string();
                if job.state().is_terminal() {
                    self.slots.insert(id, Slot::Held(job));
                } else {
                    self.enqueue(job);
                }
            }
        }
    }

    fn enqueue(&mut self, job: Job) {
        let id = job.id().to_string();
        match job.next_due() {
            Some(at) if job.state().is_waiting() => {
                self.queue.push(DueEntry { at, priority: job.priority(), id: id.clone() });
                self.slots.insert(id, Slot::Held(job));
            }
            _ => {
                self.slots.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{AnchoredClock, ManualClock};
    use crate::job::JobState;
    use crate::recipient::{HttpMethod, HttpRecipient, Recipient, RecipientKind};
    use crate::store::KvJobStore;
    use crate::testkit::{utc, ScriptedTransport};
    use crate::trigger::{PeriodUnit, TriggerSpec};
    use chrono::{FixedOffset, TimeDelta};

    const T0: &str = "2024-01-01T00:00:00Z";

    struct Rig {
        handle: SchedulerHandle,
        transport: Arc<ScriptedTransport>,
        store: KvJobStore<crate::store::MemKv>,
        shutdown: watch::Sender<bool>,
    }

    fn rig_with(transport: ScriptedTransport, settings: SchedulerSettings, store: KvJobStore<crate::store::MemKv>) -> Rig {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(utc(T0)));
        let transport = Arc::new(transport);
        let invoker = RecipientInvoker::new(Duration::from_secs(30), clock.clone())
            .with_transport(RecipientKind::Http, transport.clone());
        let (tx, rx) = watch::channel(false);
        let (handle, _task) = Scheduler::new(store.clone(), invoker, clock, settings)
            .spawn(rx)
            .unwrap();
        Rig { handle, transport, store, shutdown: tx }
    }

    fn rig(transport: ScriptedTransport, settings: SchedulerSettings) -> Rig {
        rig_with(transport, settings, KvJobStore::in_memory())
    }

    fn settings(max_attempts: u32) -> SchedulerSettings {
        SchedulerSettings {
            retry: RetryPolicy::fixed(max_attempts, Duration::from_secs(5)),
            ..SchedulerSettings::default()
        }
    }

    fn offset_start(delay: TimeDelta) -> DateTime<FixedOffset> {
        (utc(T0) + delay).with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap())
    }

    fn job(id: &str, delay: TimeDelta, period: i64, unit: PeriodUnit, repeat_count: i64) -> NewJob {
        NewJob {
            id: Some(id.to_string()),
            trigger: TriggerSpec {
                start_time: offset_start(delay),
                period,
                period_unit: unit,
                repeat_count,
                end_time: None,
            },
            recipient: Recipient::Http(HttpRecipient::new(HttpMethod::Post, "https://example.test/hook")),
            priority: 0,
        }
    }

    async fn wait_for(handle: &SchedulerHandle, id: &str, want: JobState) -> JobSnapshot {
        for _ in 0..100_000 {
            let snap = handle.status(id).await.unwrap();
            if snap.state == want {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {id} never reached {want}");
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_job_runs_to_executed() {
        let rig = rig(ScriptedTransport::always(200), settings(3));
        let mut events = rig.handle.subscribe();
        let id = rig
            .handle
            .create(job("tick", TimeDelta::zero(), 1, PeriodUnit::Minute, 2))
            .await
            .unwrap();

        let snap = wait_for(&rig.handle, &id, JobState::Executed).await;
        assert_eq!(snap.current_repeat_count, 2);
        assert_eq!(snap.attempt, 0);
        assert_eq!(rig.transport.calls(), 3);

        let mut stamps = Vec::new();
        for _ in 0..3 {
            stamps.push(events.recv().await.unwrap().timestamp);
        }
        assert_eq!(stamps[0], utc(T0));
        let third = stamps[2] - utc(T0);
        assert!(third >= TimeDelta::minutes(2) && third < TimeDelta::minutes(2) + TimeDelta::seconds(1));

        let stored = rig.store.load(&id).unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Executed);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_recipient_ends_in_error_after_max_attempts() {
        let rig = rig(ScriptedTransport::always(500), settings(3));
        let id = rig
            .handle
            .create(job("flaky", TimeDelta::zero(), 1, PeriodUnit::Hour, -1))
            .await
            .unwrap();

        let snap = wait_for(&rig.handle, &id, JobState::Error).await;
        assert_eq!(rig.transport.calls(), 3);
        assert_eq!(snap.attempt, 3);
        assert_eq!(snap.current_repeat_count, 0);
        assert_eq!(snap.last_response.map(|r| r.code), Some(500));
        assert_eq!(snap.next_due, None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_success_continues_the_schedule() {
        let rig = rig(ScriptedTransport::scripted([503, 0], 200), settings(3));
        let id = rig
            .handle
            .create(job("wobbly", TimeDelta::zero(), 1, PeriodUnit::Hour, 1))
            .await
            .unwrap();

        let snap = wait_for(&rig.handle, &id, JobState::Executed).await;
        assert_eq!(rig.transport.calls(), 4);
        assert_eq!(snap.current_repeat_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_scheduled_never_fires() {
        let rig = rig(ScriptedTransport::always(200), settings(3));
        let id = rig
            .handle
            .create(job("later", TimeDelta::hours(1), 1, PeriodUnit::Hour, -1))
            .await
            .unwrap();

        assert_eq!(rig.handle.cancel(&id).await.unwrap(), CancelOutcome::Canceled);
        assert_eq!(rig.handle.status(&id).await.unwrap().state, JobState::Canceled);
        tokio::time::sleep(Duration::from_secs(4 * 3600)).await;
        assert_eq!(rig.transport.calls(), 0);
        assert_eq!(rig.handle.cancel(&id).await.unwrap(), CancelOutcome::AlreadyTerminal);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_firing_applies_after_the_outcome() {
        let slow = ScriptedTransport::always(200).with_delay(Duration::from_secs(10));
        let rig = rig(slow, settings(3));
        let id = rig
            .handle
            .create(job("slow", TimeDelta::zero(), 1, PeriodUnit::Minute, -1))
            .await
            .unwrap();

        wait_for(&rig.handle, &id, JobState::Firing).await;
        assert_eq!(rig.handle.cancel(&id).await.unwrap(), CancelOutcome::Canceled);
        let mid = rig.handle.status(&id).await.unwrap();
        assert_eq!(mid.state, JobState::Firing);
        assert!(mid.cancel_requested);

        let snap = wait_for(&rig.handle, &id, JobState::Canceled).await;
        assert_eq!(snap.last_response.map(|r| r.code), Some(200));
        assert_eq!(rig.transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_firing_survives_a_restart() {
        let slow = ScriptedTransport::always(200).with_delay(Duration::from_secs(10));
        let first = rig(slow, settings(3));
        let id = first
            .handle
            .create(job("slow", TimeDelta::zero(), 1, PeriodUnit::Minute, -1))
            .await
            .unwrap();
        wait_for(&first.handle, &id, JobState::Firing).await;
        assert_eq!(first.handle.cancel(&id).await.unwrap(), CancelOutcome::Canceled);

        let stored = first.store.load(&id).unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Firing);
        assert!(stored.cancel_requested());

        // Stop before the in-flight attempt reports back, as if the process died.
        first.shutdown.send(true).unwrap();
        tokio::task::yield_now().await;

        let second = rig_with(ScriptedTransport::always(200), settings(3), first.store.clone());
        let snap = second.handle.status(&id).await.unwrap();
        assert_eq!(snap.state, JobState::Canceled);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(second.transport.calls(), 0);
        assert_eq!(second.store.load(&id).unwrap().map(|j| j.state()), Some(JobState::Canceled));
    }

    #[test]
    fn cancel_drops_the_queued_entry() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(utc(T0)));
        let invoker = RecipientInvoker::new(Duration::from_secs(1), clock.clone());
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(1);
        let mut c = Scheduler::new(KvJobStore::in_memory(), invoker, clock.clone(), settings(1))
            .into_coordinator(cmd_rx, events);

        let far = Job::create(job("far", TimeDelta::days(365), 1, PeriodUnit::Day, -1), clock.now()).unwrap();
        c.create(far).unwrap();
        assert_eq!(c.queue.len(), 1);
        assert!(c.next_wake().is_some());

        assert_eq!(c.cancel("far").unwrap(), CancelOutcome::Canceled);
        assert!(c.queue.is_empty());
        assert!(c.slots.is_empty());
        assert_eq!(c.next_wake(), None);
        assert_eq!(c.status("far").unwrap().state, JobState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn a_job_never_overlaps_itself() {
        let slow = ScriptedTransport::always(200).with_delay(Duration::from_millis(50));
        let rig = rig(slow, SchedulerSettings { max_concurrency: 4, ..settings(1) });
        let id = rig
            .handle
            .create(job("fast", TimeDelta::zero(), 1, PeriodUnit::Millisecond, 20))
            .await
            .unwrap();

        wait_for(&rig.handle, &id, JobState::Executed).await;
        assert_eq!(rig.transport.calls(), 21);
        assert_eq!(rig.transport.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn priority_breaks_ties() {
        let rig = rig(ScriptedTransport::always(200), SchedulerSettings { max_concurrency: 1, ..settings(1) });
        let mut events = rig.handle.subscribe();
        let mut low = job("a-low", TimeDelta::minutes(1), 0, PeriodUnit::Second, 0);
        low.priority = 1;
        let mut high = job("b-high", TimeDelta::minutes(1), 0, PeriodUnit::Second, 0);
        high.priority = 9;
        rig.handle.create(low).await.unwrap();
        rig.handle.create(high).await.unwrap();

        assert_eq!(events.recv().await.unwrap().job_id, "b-high");
        assert_eq!(events.recv().await.unwrap().job_id, "a-low");
    }

    #[tokio::test(start_paused = true)]
    async fn validation_and_lookup_errors() {
        let rig = rig(ScriptedTransport::always(200), settings(3));
        let mut bad = job("bad", TimeDelta::zero(), 1, PeriodUnit::Hour, -1);
        bad.trigger.repeat_count = -7;
        assert!(matches!(
            rig.handle.create(bad).await,
            Err(SchedError::Validation(ValidationError::RepeatCountOutOfRange(-7)))
        ));
        assert!(matches!(rig.handle.status("bad").await, Err(SchedError::NotFound(_))));

        rig.handle.create(job("dup", TimeDelta::hours(1), 1, PeriodUnit::Hour, -1)).await.unwrap();
        assert!(matches!(
            rig.handle.create(job("dup", TimeDelta::hours(1), 1, PeriodUnit::Hour, -1)).await,
            Err(SchedError::Validation(ValidationError::DuplicateJobId(_)))
        ));
        assert_eq!(rig.handle.cancel("nope").await.unwrap(), CancelOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_job_does_not_stall_others() {
        let rig = rig(ScriptedTransport::scripted([500, 500], 200), settings(2));
        let bad = rig.handle.create(job("bad", TimeDelta::zero(), 1, PeriodUnit::Hour, 0)).await.unwrap();
        wait_for(&rig.handle, &bad, JobState::Error).await;

        let good = rig
            .handle
            .create(job("good", TimeDelta::minutes(1), 1, PeriodUnit::Minute, 1))
            .await
            .unwrap();
        wait_for(&rig.handle, &good, JobState::Executed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_firing_is_recovered_from_the_store() {
        let store = KvJobStore::in_memory();
        let mut crashed = Job::create(job("crashed", TimeDelta::zero(), 1, PeriodUnit::Hour, 0), utc(T0)).unwrap();
        crashed.begin_firing(utc(T0)).unwrap();
        store.save(&crashed).unwrap();

        let rig = rig_with(ScriptedTransport::always(200), settings(3), store);
        let snap = wait_for(&rig.handle, "crashed", JobState::Executed).await;
        assert_eq!(rig.transport.calls(), 1);
        assert_eq!(snap.current_repeat_count, 0);
    }

    #[test]
    fn due_entries_order_by_time_priority_then_id() {
        let e = |at: &str, priority, id: &str| DueEntry { at: utc(at), priority, id: id.into() };
        let mut heap = BinaryHeap::from(vec![
            e("2024-01-01T00:00:05Z", 0, "late"),
            e("2024-01-01T00:00:00Z", 0, "b"),
            e("2024-01-01T00:00:00Z", 5, "z"),
            e("2024-01-01T00:00:00Z", 0, "a"),
        ]);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|x| x.id)).collect();
        assert_eq!(order, vec!["z", "a", "b", "late"]);
    }
}
