// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Arbitrates between policies so that at most one session runs at a time.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::MutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::baseline::{BaselineTracker, MetricCategory};
use crate::config::LiveConfig;
use crate::handoff::{CompletedSession, PostStopHandoff};
use crate::listener::{ActivitySink, ListenerChain, SampleActivity};
use crate::policy::{ProfilerAction, ScheduleSegment, SchedulingPolicy, TriggerType};
use crate::session::{trace_file_path, SessionError, TraceControl, TraceSession};

/// Longest a start request waits for another transition to finish.
pub const START_LOCK_TIMEOUT: Duration = Duration::from_millis(500);
/// Longest a stop request waits; stopping includes the handoff.
pub const STOP_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
/// Shortest pause between two schedules of the same policy.
pub const MIN_STANDBY: Duration = Duration::from_secs(1);

/// Externally visible state of the orchestrator. The string is the owning
/// policy's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Starting(String),
    Active(String),
    Stopping(String),
}

struct ActiveSession {
    owner: String,
    trigger: TriggerType,
    session: TraceSession,
}

enum StandbyEnd {
    Elapsed,
    Refreshed,
    Cancelled,
}

/// Owns the single trace session and the lock guarding it.
pub struct Orchestrator {
    trace_control: Arc<dyn TraceControl>,
    handoff: PostStopHandoff,
    sink: ActivitySink,
    live: LiveConfig,
    cpu: Option<Arc<BaselineTracker>>,
    memory: Option<Arc<BaselineTracker>>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
    status: RwLock<SessionStatus>,
}

impl Orchestrator {
    pub fn new(
        trace_control: Arc<dyn TraceControl>,
        handoff: PostStopHandoff,
        live: LiveConfig,
    ) -> Self {
        Self {
            trace_control,
            handoff,
            sink: ActivitySink::new(),
            live,
            cpu: None,
            memory: None,
            session: tokio::sync::Mutex::new(None),
            status: RwLock::new(SessionStatus::Idle),
        }
    }

    /// Routes events reported to `sink` into the active session.
    pub fn with_sink(mut self, sink: ActivitySink) -> Self {
        self.sink = sink;
        self
    }

    /// Reports the tracker's average in the index record of every session.
    pub fn with_baseline(mut self, tracker: Arc<BaselineTracker>) -> Self {
        match tracker.category() {
            MetricCategory::Cpu => self.cpu = Some(tracker),
            MetricCategory::Memory => self.memory = Some(tracker),
        }
        self
    }

    /// Sink the host reports activity events to.
    pub fn sink(&self) -> &ActivitySink {
        &self.sink
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn is_owner(&self, source: &str) -> bool {
        matches!(&*self.status.read(), SessionStatus::Active(owner) if owner == source)
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    async fn acquire(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Option<MutexGuard<'_, Option<ActiveSession>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = tokio::time::timeout(wait, self.session.lock()) => guard.ok(),
        }
    }

    /// Starts a session owned by `policy`.
    ///
    /// Returns `Ok(false)` when another session is active or another
    /// transition did not finish in time. On error no session is active.
    pub async fn request_start(
        &self,
        policy: &dyn SchedulingPolicy,
        cancel: &CancellationToken,
    ) -> Result<bool, SessionError> {
        let source = policy.source();
        let Some(mut slot) = self.acquire(START_LOCK_TIMEOUT, cancel).await else {
            tracing::warn!(policy = source, "session lock busy, start declined");
            return Ok(false);
        };
        if let Some(active) = slot.as_ref() {
            tracing::warn!(policy = source, owner = %active.owner, "session already active, start declined");
            return Ok(false);
        }

        self.set_status(SessionStatus::Starting(source.to_owned()));
        match self.start_session() {
            Ok(session) => {
                tracing::info!(
                    policy = source,
                    session_id = %session.session_id(),
                    trace_path = ?session.trace_path(),
                    "profiling session started"
                );
                *slot = Some(ActiveSession {
                    owner: source.to_owned(),
                    trigger: policy.trigger(),
                    session,
                });
                self.set_status(SessionStatus::Active(source.to_owned()));
                Ok(true)
            }
            Err(err) => {
                self.set_status(SessionStatus::Idle);
                Err(err)
            }
        }
    }

    fn new_chain(&self) -> Result<Arc<ListenerChain>, SessionError> {
        let config = self.live.borrow();
        let chain = ListenerChain::new(
            config.listener_variants.clone(),
            config.listener_health_points,
        )?;
        Ok(Arc::new(chain))
    }

    fn start_session(&self) -> Result<TraceSession, SessionError> {
        let (directory, providers) = {
            let config = self.live.borrow();
            (config.trace_directory(), config.providers.clone())
        };
        let chain = self.new_chain()?;
        std::fs::create_dir_all(&directory)?;
        let trace_path = trace_file_path(&directory, self.trace_control.file_extension());

        match self.trace_control.enable(&trace_path, &providers) {
            Ok(session_start) => {
                self.sink.attach(chain.clone());
                Ok(TraceSession::new(session_start, trace_path, chain))
            }
            Err(err) => {
                tracing::error!(?err, ?trace_path, "unable to start trace");
                if self.trace_control.is_running() {
                    if let Err(err) = self.trace_control.disable() {
                        tracing::warn!(?err, "unable to stop partially started trace");
                    }
                }
                // SECURITY: leave the file alone while something may still
                // write to it
                if !self.trace_control.is_running() {
                    remove_partial_trace(&trace_path);
                }
                Err(err)
            }
        }
    }

    /// Stops the session if `source` owns it, then hands the trace over.
    ///
    /// Returns whether a session was stopped.
    pub async fn request_stop(&self, source: &str, cancel: &CancellationToken) -> bool {
        if !self.is_owner(source) {
            return false;
        }
        let Some(mut slot) = self.acquire(STOP_LOCK_TIMEOUT, cancel).await else {
            tracing::warn!(policy = source, "session lock busy, stop declined");
            return false;
        };
        match slot.as_ref() {
            Some(active) if active.owner == source => {}
            _ => return false,
        }
        self.stop_locked(&mut slot, cancel).await
    }

    /// Stops whatever session is active, regardless of its owner.
    pub async fn shutdown(&self, cancel: &CancellationToken) {
        let Ok(mut slot) = tokio::time::timeout(STOP_LOCK_TIMEOUT, self.session.lock()).await
        else {
            tracing::warn!("session lock busy, unable to stop session on shutdown");
            return;
        };
        if slot.is_some() {
            tracing::info!("stopping active session on shutdown");
            self.stop_locked(&mut slot, cancel).await;
        }
    }

    async fn stop_locked(
        &self,
        slot: &mut Option<ActiveSession>,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(active) = slot.take() else {
            return false;
        };
        let owner = active.owner;
        self.set_status(SessionStatus::Stopping(owner.clone()));

        // no event may reach the session once the trace is closed
        self.sink.detach();
        let samples = active.session.listeners().drain();

        if let Err(err) = self.trace_control.disable() {
            if self.trace_control.is_running() {
                tracing::error!(?err, policy = %owner, "unable to stop trace, session stays active");
                let session = self.resume(active.session, samples);
                *slot = Some(ActiveSession {
                    owner: owner.clone(),
                    trigger: active.trigger,
                    session,
                });
                self.set_status(SessionStatus::Active(owner));
                return false;
            }
            tracing::warn!(?err, policy = %owner, "error stopping trace, it is no longer running");
        }

        let session = &active.session;
        let completed = CompletedSession {
            session_id: session.session_id(),
            session_start: session.session_start(),
            session_end: Utc::now(),
            trace_path: session.trace_path().to_owned(),
            samples,
            source: owner.clone(),
            trigger: active.trigger,
            average_cpu_usage: self.cpu.as_ref().map_or(0.0, |b| b.average()),
            average_memory_usage: self.memory.as_ref().map_or(0.0, |b| b.average()),
        };
        tracing::info!(
            policy = %owner,
            session_id = %completed.session_id,
            samples = completed.samples.len(),
            "profiling session stopped"
        );
        let outcome = self.handoff.run(completed, cancel).await;
        tracing::debug!(policy = %owner, ?outcome, "handoff finished");
        self.set_status(SessionStatus::Idle);
        true
    }

    /// Gives a session whose trace could not be stopped a fresh listener
    /// holding the samples drained so far.
    fn resume(&self, session: TraceSession, samples: Vec<SampleActivity>) -> TraceSession {
        let chain = match self.new_chain() {
            Ok(chain) => chain,
            Err(err) => {
                tracing::warn!(?err, "unable to resume listener, keeping the drained one");
                session.listeners().clone()
            }
        };
        for sample in samples {
            if let Err(err) = chain.samples().try_push(sample) {
                tracing::debug!(%err, "dropping sample on resume");
            }
        }
        self.sink.attach(chain.clone());
        TraceSession::new(session.session_start(), session.trace_path().to_owned(), chain)
    }

    /// Runs `policy` until `cancel` fires.
    ///
    /// Each schedule is executed segment by segment. Settings are refreshed
    /// before computing a schedule and while sleeping through standby
    /// segments; a refresh abandons the rest of the schedule.
    pub async fn run_policy(&self, policy: &dyn SchedulingPolicy, cancel: &CancellationToken) {
        let source = policy.source();
        tracing::info!(policy = source, "policy loop started");
        'schedule: while !cancel.is_cancelled() {
            if policy.needs_refresh() {
                tracing::debug!(policy = source, "settings refreshed");
            }
            let schedule = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                schedule = policy.get_schedule() => schedule,
            };
            tracing::debug!(policy = source, ?schedule, "schedule computed");
            let schedule = if schedule.is_empty() {
                vec![ScheduleSegment::standby(MIN_STANDBY)]
            } else {
                schedule
            };

            for segment in schedule {
                match segment.action {
                    ProfilerAction::StartProfilingSession => {
                        if policy.is_enabled() {
                            if let Err(err) = self.request_start(policy, cancel).await {
                                tracing::error!(?err, policy = source, "unable to start profiling session");
                            }
                        }
                        if !sleep(segment.duration, cancel).await {
                            break 'schedule;
                        }
                    }
                    ProfilerAction::Standby => {
                        if self.is_owner(source) {
                            self.request_stop(source, cancel).await;
                        }
                        match self.standby(policy, segment.duration, cancel).await {
                            StandbyEnd::Elapsed => {}
                            StandbyEnd::Refreshed => continue 'schedule,
                            StandbyEnd::Cancelled => break 'schedule,
                        }
                    }
                }
            }
        }
        tracing::info!(policy = source, "policy loop finished");
    }

    async fn standby(
        &self,
        policy: &dyn SchedulingPolicy,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> StandbyEnd {
        let refresh_interval = self.live.borrow().config_refresh_interval;
        let deadline = Instant::now() + duration.max(MIN_STANDBY);
        loop {
            let now = Instant::now();
            if now >= deadline {
                return StandbyEnd::Elapsed;
            }
            let left = deadline - now;
            let chunk = if refresh_interval.is_zero() {
                left
            } else {
                left.min(refresh_interval)
            };
            if !sleep(chunk, cancel).await {
                return StandbyEnd::Cancelled;
            }
            if Instant::now() < deadline && policy.needs_refresh() {
                tracing::debug!(policy = policy.source(), "settings changed, recomputing schedule");
                return StandbyEnd::Refreshed;
            }
        }
    }
}

/// Sleeps for `duration`, returning false if cancelled first.
async fn sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn remove_partial_trace(trace_path: &Path) {
    match std::fs::remove_file(trace_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(?err, ?trace_path, "unable to remove partial trace"),
    }
}
