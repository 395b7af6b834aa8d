// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    asprof::{AsProfError, AsProfTraceControl},
    baseline::{BaselineTracker, MetricCategory, MetricsProvider},
    config::{ConfigError, LiveConfig, ProfilerConfig},
    handoff::{AccessTokenProvider, PostStopHandoff, ProcessUploaderLauncher, UploaderLauncher},
    listener::ActivitySink,
    metadata::AgentMetadata,
    orchestrator::Orchestrator,
    policy::{CollectionPlanSource, OnDemandPolicy, RandomPolicy, SchedulingPolicy, ThresholdPolicy},
    session::TraceControl,
};

/// Builds a [`Profiler`]. Everything is optional: without a trace control
/// the profiler loads async-profiler, without an uploader launcher it runs
/// the executable named in the configuration.
///
/// The CPU and memory policies only run when a metrics provider is given for
/// them, and the on-demand policy only runs with a collection plan source.
#[derive(Default)]
pub struct ProfilerBuilder {
    live: Option<LiveConfig>,
    trace_control: Option<Arc<dyn TraceControl>>,
    launcher: Option<Arc<dyn UploaderLauncher>>,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
    cpu_metrics: Option<Box<dyn MetricsProvider>>,
    memory_metrics: Option<Box<dyn MetricsProvider>>,
    collection_plans: Option<Arc<dyn CollectionPlanSource>>,
    agent_metadata: Option<AgentMetadata>,
}

impl ProfilerBuilder {
    /// Sets a configuration that never changes.
    pub fn with_config(self, config: ProfilerConfig) -> ProfilerBuilder {
        let (_tx, live) = tokio::sync::watch::channel(config);
        self.with_live_config(live)
    }

    /// Sets a configuration the host may update while the profiler runs.
    pub fn with_live_config(mut self, live: LiveConfig) -> ProfilerBuilder {
        self.live = Some(live);
        self
    }

    /// Sets the backend starting and stopping traces.
    pub fn with_trace_control(mut self, t: impl TraceControl) -> ProfilerBuilder {
        self.trace_control = Some(Arc::new(t));
        self
    }

    pub fn with_uploader_launcher(mut self, l: impl UploaderLauncher + 'static) -> ProfilerBuilder {
        self.launcher = Some(Arc::new(l));
        self
    }

    /// Sets the source of the access token forwarded to the uploader.
    pub fn with_access_token_provider(
        mut self,
        p: impl AccessTokenProvider + 'static,
    ) -> ProfilerBuilder {
        self.token_provider = Some(Arc::new(p));
        self
    }

    /// Enables the CPU triggered policy, sampling `m` for its baseline.
    pub fn with_cpu_metrics(mut self, m: impl MetricsProvider) -> ProfilerBuilder {
        self.cpu_metrics = Some(Box::new(m));
        self
    }

    /// Enables the memory triggered policy, sampling `m` for its baseline.
    pub fn with_memory_metrics(mut self, m: impl MetricsProvider) -> ProfilerBuilder {
        self.memory_metrics = Some(Box::new(m));
        self
    }

    /// Enables the on-demand policy.
    pub fn with_collection_plans(mut self, plans: Arc<dyn CollectionPlanSource>) -> ProfilerBuilder {
        self.collection_plans = Some(plans);
        self
    }

    /// Provide custom agent metadata.
    pub fn with_custom_agent_metadata(mut self, md: AgentMetadata) -> ProfilerBuilder {
        self.agent_metadata = Some(md);
        self
    }

    /// Turn this builder into a profiler!
    pub fn build(self) -> Profiler {
        Profiler {
            builder: self,
            sink: ActivitySink::new(),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnError {
    #[error(transparent)]
    AsProf(#[from] AsProfError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Trigger-driven profiler.
pub struct Profiler {
    builder: ProfilerBuilder,
    sink: ActivitySink,
}

impl Profiler {
    /// Handle the application reports activity events to. Events are only
    /// collected while a session is active.
    pub fn activity_sink(&self) -> ActivitySink {
        self.sink.clone()
    }

    /// Starts every policy in a tokio task. The task finishes once `cancel`
    /// fires and the active session, if any, has been stopped.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>, SpawnError> {
        let trace_control: Arc<dyn TraceControl> = match self.builder.trace_control.clone() {
            Some(trace_control) => trace_control,
            None => Arc::new(AsProfTraceControl::new()?),
        };
        self.spawn_inner(trace_control, cancel)
    }

    fn spawn_inner(
        self,
        trace_control: Arc<dyn TraceControl>,
        cancel: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>, SpawnError> {
        let b = self.builder;
        let live = b
            .live
            .unwrap_or_else(|| tokio::sync::watch::channel(ProfilerConfig::default()).1);
        let config = live.borrow().clone();
        config.validate()?;

        let launcher = b.launcher.unwrap_or_else(|| {
            Arc::new(ProcessUploaderLauncher::new(config.handoff.uploader_path.clone()))
        });
        let handoff = PostStopHandoff::new(
            launcher,
            b.token_provider,
            b.agent_metadata.unwrap_or_else(AgentMetadata::from_host),
            live.clone(),
        );
        let mut orchestrator =
            Orchestrator::new(trace_control, handoff, live.clone()).with_sink(self.sink);

        let mut policies: Vec<Arc<dyn SchedulingPolicy>> = vec![];
        let mut samplers = vec![];
        let thresholds = [
            (MetricCategory::Cpu, b.cpu_metrics, &config.cpu),
            (MetricCategory::Memory, b.memory_metrics, &config.memory),
        ];
        for (category, provider, settings) in thresholds {
            let Some(provider) = provider else {
                tracing::debug!(%category, "no metrics provider, threshold policy not registered");
                continue;
            };
            let tracker = Arc::new(BaselineTracker::new(
                category,
                settings.baseline_window,
                settings.sampling_interval,
            ));
            samplers.push(tracker.clone().spawn(
                provider,
                settings.sampling_interval,
                cancel.clone(),
            ));
            orchestrator = orchestrator.with_baseline(tracker.clone());
            policies.push(Arc::new(ThresholdPolicy::new(tracker, live.clone())));
        }
        policies.push(Arc::new(RandomPolicy::new(live.clone())));
        if let Some(plans) = b.collection_plans {
            policies.push(Arc::new(OnDemandPolicy::new(plans, live.clone())));
        }
        let orchestrator = Arc::new(orchestrator);

        Ok(tokio::spawn(async move {
            let delay = config.initial_delay;
            if !delay.is_zero() {
                tracing::info!(?delay, "delaying profiling");
            }
            let delayed = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };

            if delayed {
                tracing::info!(policies = policies.len(), "profiler started");
                let loops = policies.into_iter().map(|policy| {
                    let orchestrator = orchestrator.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move { orchestrator.run_policy(&*policy, &cancel).await })
                });
                for result in futures::future::join_all(loops).await {
                    if let Err(err) = result {
                        tracing::error!(?err, "policy loop panicked");
                    }
                }
            }

            orchestrator.shutdown(&cancel).await;
            futures::future::join_all(samplers).await;
            tracing::info!("profiling task finished");
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::config::UploadMode;
    use crate::policy::{CollectionPlan, CollectionPlans};
    use crate::session::{ProviderSelector, SessionError};

    #[derive(Clone, Default)]
    struct MockTraceControl {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TraceControl for MockTraceControl {
        fn enable(
            &self,
            trace_path: &Path,
            _providers: &[ProviderSelector],
        ) -> Result<DateTime<Utc>, SessionError> {
            std::fs::write(trace_path, b"TRACE")?;
            self.calls.lock().push("enable");
            Ok(Utc::now())
        }

        fn disable(&self) -> Result<(), SessionError> {
            self.calls.lock().push("disable");
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.calls.lock().last() == Some(&"enable")
        }
    }

    fn config(dir: &Path) -> ProfilerConfig {
        let mut config = ProfilerConfig::default();
        config.trace_directory = Some(dir.to_owned());
        config.upload_mode = UploadMode::Never;
        config.random.enabled = false;
        config
    }

    fn plan(token: &str, duration_secs: f64) -> CollectionPlan {
        CollectionPlan {
            token: token.into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            duration_secs: Some(duration_secs),
        }
    }

    fn profiler(config: ProfilerConfig, plans: Arc<CollectionPlans>) -> Profiler {
        ProfilerBuilder::default()
            .with_config(config)
            .with_collection_plans(plans)
            .with_custom_agent_metadata(AgentMetadata {
                machine_name: "machine".into(),
                process_name: "process".into(),
                process_id: 1,
                os: "linux".into(),
            })
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_session() {
        let dir = tempfile::tempdir().unwrap();
        let plans = CollectionPlans::new();
        plans.publish(Some(plan("t1", 10.0)));
        let trace = MockTraceControl::default();
        let cancel = CancellationToken::new();
        let handle = profiler(config(dir.path()), plans)
            .spawn_inner(Arc::new(trace.clone()), cancel.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*trace.calls.lock(), ["enable"]);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*trace.calls.lock(), ["enable", "disable"]);
        // upload mode never, the trace is gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay() {
        let dir = tempfile::tempdir().unwrap();
        let plans = CollectionPlans::new();
        plans.publish(Some(plan("t1", 10.0)));
        let mut config = config(dir.path());
        config.initial_delay = Duration::from_secs(30);
        let trace = MockTraceControl::default();
        let cancel = CancellationToken::new();
        let handle = profiler(config, plans)
            .spawn_inner(Arc::new(trace.clone()), cancel.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(trace.calls.lock().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*trace.calls.lock(), ["enable"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let plans = CollectionPlans::new();
        plans.publish(Some(plan("t1", 300.0)));
        let trace = MockTraceControl::default();
        let cancel = CancellationToken::new();
        let profiler = profiler(config(dir.path()), plans);
        let sink = profiler.activity_sink();
        let handle = profiler
            .spawn_inner(Arc::new(trace.clone()), cancel.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink.is_attached());
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*trace.calls.lock(), ["enable", "disable"]);
        assert!(!sink.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_policy_registered_with_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.cpu.threshold_percent = 50.0;
        config.memory.enabled = false;
        let trace = MockTraceControl::default();
        let cancel = CancellationToken::new();
        let handle = ProfilerBuilder::default()
            .with_config(config)
            .with_cpu_metrics(|| 90.0_f32)
            .build()
            .spawn_inner(Arc::new(trace.clone()), cancel.clone())
            .unwrap();

        // the first schedule is computed before any sample; the next one
        // after the 5s polling interval sees a 90% baseline
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(*trace.calls.lock(), ["enable"]);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*trace.calls.lock(), ["enable", "disable"]);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut config = ProfilerConfig::default();
        config.random.overhead = 2.0;
        let err = ProfilerBuilder::default()
            .with_config(config)
            .build()
            .spawn_inner(Arc::new(MockTraceControl::default()), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SpawnError::Config(ConfigError::OverheadOutOfRange(_))
        ));
    }
}
