// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sessions requested remotely through collection plans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::{CachedSettings, ScheduleSegment, SchedulingPolicy, TriggerType};
use crate::config::{LiveConfig, OnDemandPolicyConfig};

/// Used when a plan does not specify a usable duration.
pub const DEFAULT_ON_DEMAND_DURATION: Duration = Duration::from_secs(120);
/// Longest session a plan may request.
pub const MAX_ON_DEMAND_DURATION: Duration = Duration::from_secs(360);

/// A remote request to profile once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPlan {
    /// Identifies the request; a plan is acted upon once per token.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Requested session length in seconds.
    pub duration_secs: Option<f64>,
}

/// Remote settings delivering collection plans.
#[async_trait]
pub trait CollectionPlanSource: Send + Sync {
    /// Resolves once the remote settings have been fetched at least once.
    async fn wait_initialized(&self);

    fn current_plan(&self) -> Option<CollectionPlan>;
}

/// In-process [`CollectionPlanSource`] the host publishes plans into.
#[derive(Debug, Default)]
pub struct CollectionPlans {
    initialized: AtomicBool,
    ready: Notify,
    plan: Mutex<Option<CollectionPlan>>,
}

impl CollectionPlans {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the latest remote settings. `None` means no plan is pending.
    pub fn publish(&self, plan: Option<CollectionPlan>) {
        *self.plan.lock() = plan;
        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.ready.notify_waiters();
        }
    }
}

#[async_trait]
impl CollectionPlanSource for CollectionPlans {
    async fn wait_initialized(&self) {
        let ready = self.ready.notified();
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        ready.await;
    }

    fn current_plan(&self) -> Option<CollectionPlan> {
        self.plan.lock().clone()
    }
}

/// Resolves the session length requested by a plan.
///
/// Anything outside `(0, 360]` seconds, or missing, falls back to 120s.
pub fn resolve_duration(requested_secs: Option<f64>) -> Duration {
    match requested_secs {
        Some(secs) if secs > 0.0 && secs <= MAX_ON_DEMAND_DURATION.as_secs_f64() => {
            Duration::from_secs_f64(secs)
        }
        _ => DEFAULT_ON_DEMAND_DURATION,
    }
}

pub struct OnDemandPolicy {
    plans: Arc<dyn CollectionPlanSource>,
    settings: CachedSettings<OnDemandPolicyConfig>,
    last_token: Mutex<Option<String>>,
}

impl OnDemandPolicy {
    pub fn new(plans: Arc<dyn CollectionPlanSource>, live: LiveConfig) -> Self {
        Self {
            plans,
            settings: CachedSettings::new(live, |c| c.on_demand.clone()),
            last_token: Mutex::new(None),
        }
    }

    /// Takes the current plan if it is new and still valid.
    fn take_new_plan(&self, now: DateTime<Utc>) -> Option<CollectionPlan> {
        let plan = self.plans.current_plan()?;
        let mut last_token = self.last_token.lock();
        if last_token.as_deref() == Some(plan.token.as_str()) {
            return None;
        }
        if plan.expires_at <= now {
            tracing::debug!(token = %plan.token, expires_at = %plan.expires_at, "ignoring expired collection plan");
            return None;
        }
        *last_token = Some(plan.token.clone());
        Some(plan)
    }
}

#[async_trait]
impl SchedulingPolicy for OnDemandPolicy {
    fn source(&self) -> &str {
        "on-demand"
    }

    fn trigger(&self) -> TriggerType {
        TriggerType::OnDemand
    }

    fn is_enabled(&self) -> bool {
        self.settings.get().enabled
    }

    async fn get_schedule(&self) -> Vec<ScheduleSegment> {
        let settings = self.settings.get();
        if !settings.enabled {
            return vec![ScheduleSegment::standby(settings.polling_interval)];
        }
        if tokio::time::timeout(settings.settings_init_timeout, self.plans.wait_initialized())
            .await
            .is_err()
        {
            tracing::debug!(policy = self.source(), "remote settings not initialized yet");
        }

        match self.take_new_plan(Utc::now()) {
            Some(plan) => {
                let duration = resolve_duration(plan.duration_secs);
                tracing::info!(policy = self.source(), token = %plan.token, ?duration, "collection plan received");
                vec![
                    ScheduleSegment::start(duration),
                    ScheduleSegment::standby(settings.cooldown),
                ]
            }
            None => vec![ScheduleSegment::standby(settings.polling_interval)],
        }
    }

    fn needs_refresh(&self) -> bool {
        self.settings.refresh(self.source())
    }
}
