// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Random profiling within an overhead quota.
//!
//! The planning window is cut into segments of the profiling duration. A
//! quota of them, proportional to the target overhead, is picked at random
//! for profiling; the rest are standby.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    push_segment, CachedSettings, PolicyError, ProfilerAction, ScheduleSegment, SchedulingPolicy,
    TriggerType,
};
use crate::config::{LiveConfig, RandomPolicyConfig};

/// Span covered by one random plan.
pub const PLANNING_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

pub struct RandomPolicy {
    settings: CachedSettings<RandomPolicyConfig>,
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new(live: LiveConfig) -> Self {
        Self::with_rng(live, StdRng::from_os_rng())
    }

    pub fn with_rng(live: LiveConfig, rng: StdRng) -> Self {
        Self {
            settings: CachedSettings::new(live, |c| c.random.clone()),
            rng: Mutex::new(rng),
        }
    }
}

/// Plans `window` with `overhead` of it spent profiling in segments of
/// `duration`.
///
/// Adjacent standby segments are merged, and a plan never ends on a start
/// segment so the session it opens is closed before the next plan begins.
pub fn plan<R: Rng + ?Sized>(
    window: Duration,
    duration: Duration,
    overhead: f64,
    polling_interval: Duration,
    rng: &mut R,
) -> Result<Vec<ScheduleSegment>, PolicyError> {
    if duration.is_zero() {
        return Err(PolicyError::ZeroDuration);
    }
    let segments = (window.as_secs_f64() / duration.as_secs_f64()).round() as usize;
    if segments == 0 {
        return Err(PolicyError::WindowTooShort { window, duration });
    }
    let overhead = overhead.clamp(0.0, 1.0);
    let profiling = ((segments as f64 * overhead).round() as usize).min(segments);
    if profiling == 0 {
        return Ok(vec![ScheduleSegment::standby(polling_interval)]);
    }

    let mut picked = vec![false; segments];
    for index in rand::seq::index::sample(rng, segments, profiling) {
        picked[index] = true;
    }

    let mut schedule = Vec::with_capacity(profiling * 2 + 1);
    for start in picked {
        let segment = if start {
            ScheduleSegment::start(duration)
        } else {
            ScheduleSegment::standby(duration)
        };
        push_segment(&mut schedule, segment);
    }
    if schedule.last().map(|s| s.action) == Some(ProfilerAction::StartProfilingSession) {
        schedule.push(ScheduleSegment::standby(polling_interval));
    }
    Ok(schedule)
}

#[async_trait]
impl SchedulingPolicy for RandomPolicy {
    fn source(&self) -> &str {
        "random"
    }

    fn trigger(&self) -> TriggerType {
        TriggerType::Random
    }

    fn is_enabled(&self) -> bool {
        self.settings.get().enabled
    }

    async fn get_schedule(&self) -> Vec<ScheduleSegment> {
        let settings = self.settings.get();
        if !settings.enabled {
            return vec![ScheduleSegment::standby(settings.polling_interval)];
        }
        let planned = plan(
            PLANNING_WINDOW,
            settings.duration,
            settings.overhead,
            settings.polling_interval,
            &mut *self.rng.lock(),
        );
        match planned {
            Ok(schedule) => {
                tracing::debug!(
                    policy = self.source(),
                    segments = schedule.len(),
                    overhead = settings.overhead,
                    "computed random schedule"
                );
                schedule
            }
            Err(err) => {
                tracing::warn!(policy = self.source(), %err, "no valid random plan, standing by");
                vec![ScheduleSegment::standby(settings.polling_interval)]
            }
        }
    }

    fn needs_refresh(&self) -> bool {
        self.settings.refresh(self.source())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::config::ProfilerConfig;
    use crate::policy::test_util::live_config;

    const POLL: Duration = Duration::from_secs(5);

    fn start_total(schedule: &[ScheduleSegment]) -> Duration {
        schedule
            .iter()
            .filter(|s| s.action == ProfilerAction::StartProfilingSession)
            .map(|s| s.duration)
            .sum()
    }

    #[test]
    fn test_five_percent_of_twelve_hours() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = plan(
            PLANNING_WINDOW,
            Duration::from_secs(120),
            0.05,
            POLL,
            &mut rng,
        )
        .unwrap();
        // 360 segments, 18 of them profiling
        assert_eq!(start_total(&schedule), Duration::from_secs(18 * 120));
        assert_eq!(schedule.last().unwrap().action, ProfilerAction::Standby);
    }

    #[test]
    fn test_zero_quota_is_single_standby() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = plan(PLANNING_WINDOW, Duration::from_secs(120), 0.0, POLL, &mut rng).unwrap();
        assert_eq!(schedule, [ScheduleSegment::standby(POLL)]);
    }

    #[test]
    fn test_full_quota_ends_with_standby() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = plan(
            Duration::from_secs(600),
            Duration::from_secs(120),
            1.0,
            POLL,
            &mut rng,
        )
        .unwrap();
        assert_eq!(start_total(&schedule), Duration::from_secs(600));
        assert_eq!(schedule.last(), Some(&ScheduleSegment::standby(POLL)));
    }

    #[test]
    fn test_window_too_short() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            plan(
                Duration::from_secs(10),
                Duration::from_secs(60),
                0.5,
                POLL,
                &mut rng
            ),
            Err(PolicyError::WindowTooShort {
                window: Duration::from_secs(10),
                duration: Duration::from_secs(60),
            })
        );
        assert_eq!(
            plan(PLANNING_WINDOW, Duration::ZERO, 0.5, POLL, &mut rng),
            Err(PolicyError::ZeroDuration)
        );
    }

    #[tokio::test]
    async fn test_policy_falls_back_to_standby() {
        let mut config = ProfilerConfig::default();
        config.random.duration = Duration::from_secs(48 * 60 * 60);
        let (_tx, live) = live_config(config);
        let policy = RandomPolicy::with_rng(live, StdRng::seed_from_u64(1));
        assert_eq!(policy.get_schedule().await, [ScheduleSegment::standby(POLL)]);
    }

    #[tokio::test]
    async fn test_disabled_policy_stands_by() {
        let mut config = ProfilerConfig::default();
        config.random.enabled = false;
        let (_tx, live) = live_config(config);
        let policy = RandomPolicy::with_rng(live, StdRng::seed_from_u64(1));
        assert!(!policy.is_enabled());
        assert_eq!(policy.get_schedule().await, [ScheduleSegment::standby(POLL)]);
    }

    proptest! {
        #[test]
        fn prop_schedule_well_formed(
            window_secs in 600u64..=43_200,
            duration_secs in 10u64..=600,
            overhead in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let window = Duration::from_secs(window_secs);
            let duration = Duration::from_secs(duration_secs);
            let mut rng = StdRng::seed_from_u64(seed);
            let schedule = plan(window, duration, overhead, POLL, &mut rng).unwrap();

            let ratio = start_total(&schedule).as_secs_f64() / window.as_secs_f64();
            let width = duration.as_secs_f64() / window.as_secs_f64();
            prop_assert!((ratio - overhead).abs() <= width + 1e-9);

            for pair in schedule.windows(2) {
                prop_assert!(
                    !(pair[0].action == ProfilerAction::Standby && pair[1].action == ProfilerAction::Standby)
                );
            }
            prop_assert_eq!(schedule.last().map(|s| s.action), Some(ProfilerAction::Standby));
        }
    }
}
