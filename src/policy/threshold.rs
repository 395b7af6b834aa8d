// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CPU and memory triggered policies.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CachedSettings, ScheduleSegment, SchedulingPolicy, TriggerType};
use crate::baseline::{BaselineTracker, MetricCategory};
use crate::config::{LiveConfig, ThresholdPolicyConfig};

/// Starts a session when the rolling average of a metric exceeds a threshold.
pub struct ThresholdPolicy {
    source: String,
    trigger: TriggerType,
    baseline: Arc<BaselineTracker>,
    settings: CachedSettings<ThresholdPolicyConfig>,
}

impl ThresholdPolicy {
    /// A policy reading the section of the configuration matching the
    /// baseline's category.
    pub fn new(baseline: Arc<BaselineTracker>, live: LiveConfig) -> Self {
        let (trigger, settings) = match baseline.category() {
            MetricCategory::Cpu => (
                TriggerType::Cpu,
                CachedSettings::new(live, |c| c.cpu.clone()),
            ),
            MetricCategory::Memory => (
                TriggerType::Memory,
                CachedSettings::new(live, |c| c.memory.clone()),
            ),
        };
        Self {
            source: format!("{trigger}-threshold"),
            trigger,
            baseline,
            settings,
        }
    }
}

/// The schedule for one observation of the baseline.
pub(crate) fn schedule(settings: &ThresholdPolicyConfig, average: f32) -> Vec<ScheduleSegment> {
    if settings.enabled && average > settings.threshold_percent {
        vec![
            ScheduleSegment::start(settings.duration),
            ScheduleSegment::standby(settings.cooldown),
        ]
    } else {
        vec![ScheduleSegment::standby(settings.polling_interval)]
    }
}

#[async_trait]
impl SchedulingPolicy for ThresholdPolicy {
    fn source(&self) -> &str {
        &self.source
    }

    fn trigger(&self) -> TriggerType {
        self.trigger
    }

    fn is_enabled(&self) -> bool {
        self.settings.get().enabled
    }

    async fn get_schedule(&self) -> Vec<ScheduleSegment> {
        let settings = self.settings.get();
        let average = self.baseline.average();
        let schedule = schedule(&settings, average);
        tracing::debug!(
            policy = %self.source,
            average,
            threshold = settings.threshold_percent,
            ?schedule,
            "computed schedule"
        );
        schedule
    }

    fn needs_refresh(&self) -> bool {
        self.settings.refresh(&self.source)
    }
}
