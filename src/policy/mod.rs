// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduling policies decide when a profiling session should run.
//!
//! A policy turns its current trigger state into a list of
//! [`ScheduleSegment`]s. The [`Orchestrator`](crate::orchestrator::Orchestrator)
//! executes the list segment by segment, asking for a session to start on
//! [`ProfilerAction::StartProfilingSession`] and to stop on
//! [`ProfilerAction::Standby`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LiveConfig, ProfilerConfig};

pub mod on_demand;
pub mod random;
pub mod threshold;

pub use on_demand::{CollectionPlan, CollectionPlanSource, CollectionPlans, OnDemandPolicy};
pub use random::RandomPolicy;
pub use threshold::ThresholdPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("profiling duration must not be zero")]
    ZeroDuration,
    #[error("planning window of {window:?} holds no segment of {duration:?}")]
    WindowTooShort { window: Duration, duration: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilerAction {
    StartProfilingSession,
    Standby,
}

/// Run `action` for `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSegment {
    pub duration: Duration,
    pub action: ProfilerAction,
}

impl ScheduleSegment {
    pub fn start(duration: Duration) -> Self {
        Self {
            duration,
            action: ProfilerAction::StartProfilingSession,
        }
    }

    pub fn standby(duration: Duration) -> Self {
        Self {
            duration,
            action: ProfilerAction::Standby,
        }
    }
}

/// What triggered a session, reported to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cpu,
    Memory,
    Random,
    OnDemand,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cpu => "cpu",
            TriggerType::Memory => "memory",
            TriggerType::Random => "random",
            TriggerType::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy deciding, from live conditions, when sessions run.
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    /// Identity of the policy, used as the session owner.
    fn source(&self) -> &str;

    fn trigger(&self) -> TriggerType;

    fn is_enabled(&self) -> bool;

    /// Computes a fresh schedule from the current trigger state.
    async fn get_schedule(&self) -> Vec<ScheduleSegment>;

    /// Re-reads the live configuration, returning whether any cached
    /// setting changed.
    fn needs_refresh(&self) -> bool;
}

/// A policy's settings, cached from the live configuration.
pub(crate) struct CachedSettings<T> {
    live: LiveConfig,
    select: fn(&ProfilerConfig) -> T,
    cached: Mutex<T>,
}

impl<T: Clone + PartialEq + fmt::Debug> CachedSettings<T> {
    pub(crate) fn new(live: LiveConfig, select: fn(&ProfilerConfig) -> T) -> Self {
        let cached = select(&live.borrow());
        Self {
            live,
            select,
            cached: Mutex::new(cached),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.cached.lock().clone()
    }

    /// Replaces the cached settings if the live ones differ. An update that
    /// fails validation is ignored and the cached settings stay in effect.
    pub(crate) fn refresh(&self, source: &str) -> bool {
        let latest = {
            let live = self.live.borrow();
            if let Err(err) = live.validate() {
                tracing::warn!(policy = source, %err, "ignoring invalid configuration update");
                return false;
            }
            (self.select)(&live)
        };
        let mut cached = self.cached.lock();
        if *cached == latest {
            return false;
        }
        tracing::info!(policy = source, previous = ?*cached, current = ?latest, "policy settings changed");
        *cached = latest;
        true
    }
}

/// Appends a segment, merging it into a preceding standby.
pub(crate) fn push_segment(schedule: &mut Vec<ScheduleSegment>, segment: ScheduleSegment) {
    if segment.action == ProfilerAction::Standby {
        if let Some(last) = schedule.last_mut() {
            if last.action == ProfilerAction::Standby {
                last.duration += segment.duration;
                return;
            }
        }
    }
    schedule.push(segment);
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::config::ProfilerConfig;

    pub(crate) fn live_config(
        config: ProfilerConfig,
    ) -> (
        tokio::sync::watch::Sender<ProfilerConfig>,
        crate::config::LiveConfig,
    ) {
        tokio::sync::watch::channel(config)
    }
}
