// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rolling averages of resource metrics, read by the threshold policies.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Cpu,
    Memory,
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricCategory::Cpu => write!(f, "cpu"),
            MetricCategory::Memory => write!(f, "memory"),
        }
    }
}

/// Source of process-level metric values, in percent.
pub trait MetricsProvider: Send + 'static {
    fn next_value(&mut self) -> Result<f32, Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> MetricsProvider for F
where
    F: FnMut() -> f32 + Send + 'static,
{
    fn next_value(&mut self) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self())
    }
}

/// Upper bound on the samples kept per metric, a day at one sample per second.
pub const MAX_BASELINE_SAMPLES: usize = 86_400;

/// Rolling average over the most recent samples of one metric.
pub struct BaselineTracker {
    category: MetricCategory,
    capacity: usize,
    samples: Mutex<VecDeque<f32>>,
}

impl fmt::Debug for BaselineTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaselineTracker")
            .field("category", &self.category)
            .field("capacity", &self.capacity)
            .field("average", &self.average())
            .finish()
    }
}

impl BaselineTracker {
    /// A tracker averaging over `window`, fed every `sampling_interval`.
    pub fn new(category: MetricCategory, window: Duration, sampling_interval: Duration) -> Self {
        let capacity = if sampling_interval.is_zero() {
            1
        } else {
            (window.as_secs_f64() / sampling_interval.as_secs_f64()).ceil() as usize
        };
        Self::with_capacity(category, capacity)
    }

    pub fn with_capacity(category: MetricCategory, capacity: usize) -> Self {
        if capacity > MAX_BASELINE_SAMPLES {
            tracing::warn!(%category, capacity, max = MAX_BASELINE_SAMPLES, "baseline window too large, capping it");
        }
        let capacity = capacity.clamp(1, MAX_BASELINE_SAMPLES);
        Self {
            category,
            capacity,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn category(&self) -> MetricCategory {
        self.category
    }

    pub fn record(&self, value: f32) {
        if !value.is_finite() {
            tracing::debug!(category = %self.category, value, "ignoring non-finite metric value");
            return;
        }
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    /// Current rolling average, 0 before the first sample.
    pub fn average(&self) -> f32 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f32>() / samples.len() as f32
    }

    /// Samples the provider every `interval` until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        mut provider: Box<dyn MetricsProvider>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match provider.next_value() {
                    Ok(value) => self.record(value),
                    Err(err) => {
                        tracing::warn!(category = %self.category, ?err, "unable to sample metric, continuing")
                    }
                }
            }
            tracing::debug!(category = %self.category, "baseline sampling finished");
        })
    }
}
