// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! The configuration is owned by the host application. The agent only reads
//! it: once at startup, and again through a [`tokio::sync::watch`] channel
//! whenever a policy checks whether its cached settings are stale.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::listener::ListenerVariant;
use crate::session::ProviderSelector;

/// Live view of the configuration, shared by every policy.
pub type LiveConfig = tokio::sync::watch::Receiver<ProfilerConfig>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unable to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("random overhead must be within [0, 1], got {0}")]
    OverheadOutOfRange(f64),
    #[error("{0} must not be zero")]
    ZeroDuration(&'static str),
    #[error("threshold for {0} must be within (0, 100], got {1}")]
    ThresholdOutOfRange(&'static str, f32),
    #[error("at least one listener variant is required")]
    NoListenerVariants,
}

/// When the trace captured by a session should be handed to the uploader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// Never upload, the trace is only kept locally (if preserved).
    Never,
    /// Upload only when the session produced at least one sample.
    #[default]
    OnSuccess,
    /// Upload every session, even when no sample was collected.
    Always,
}

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Delay applied once before any policy loop begins. Default: 0s.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// How often policies re-read the live configuration. Default: 5s.
    #[serde(with = "humantime_serde")]
    pub config_refresh_interval: Duration,

    /// Directory receiving trace files. Default: the system temp directory.
    pub trace_directory: Option<PathBuf>,

    /// Keep trace files on disk after the session completes.
    pub preserve_trace_file: bool,

    pub upload_mode: UploadMode,

    /// Consecutive invalid correlations tolerated before a listener is
    /// considered poisoned. Default: 10.
    pub listener_health_points: u32,

    /// Listener variants in fail-over order. Default: request id, then
    /// activity path.
    pub listener_variants: Vec<ListenerVariant>,

    /// Trace providers enabled for every session.
    pub providers: Vec<ProviderSelector>,

    pub cpu: ThresholdPolicyConfig,
    pub memory: ThresholdPolicyConfig,
    pub random: RandomPolicyConfig,
    pub on_demand: OnDemandPolicyConfig,
    pub handoff: HandoffConfig,
    pub upload: UploadConfig,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            config_refresh_interval: Duration::from_secs(5),
            trace_directory: None,
            preserve_trace_file: false,
            upload_mode: UploadMode::OnSuccess,
            listener_health_points: 10,
            listener_variants: ListenerVariant::PRIORITY.to_vec(),
            providers: vec![ProviderSelector::default()],
            cpu: ThresholdPolicyConfig::default(),
            memory: ThresholdPolicyConfig::default(),
            random: RandomPolicyConfig::default(),
            on_demand: OnDemandPolicyConfig::default(),
            handoff: HandoffConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl ProfilerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks the values a policy cannot recover from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.random.overhead) {
            return Err(ConfigError::OverheadOutOfRange(self.random.overhead));
        }
        for (name, threshold) in [
            ("cpu", self.cpu.threshold_percent),
            ("memory", self.memory.threshold_percent),
        ] {
            if !(threshold > 0.0 && threshold <= 100.0) {
                return Err(ConfigError::ThresholdOutOfRange(name, threshold));
            }
        }
        if self.listener_variants.is_empty() {
            return Err(ConfigError::NoListenerVariants);
        }
        let durations = [
            ("config_refresh_interval", self.config_refresh_interval),
            ("cpu.duration", self.cpu.duration),
            ("cpu.polling_interval", self.cpu.polling_interval),
            ("cpu.sampling_interval", self.cpu.sampling_interval),
            ("memory.duration", self.memory.duration),
            ("memory.polling_interval", self.memory.polling_interval),
            ("memory.sampling_interval", self.memory.sampling_interval),
            ("random.duration", self.random.duration),
            ("random.polling_interval", self.random.polling_interval),
            ("on_demand.polling_interval", self.on_demand.polling_interval),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// The directory trace files are written to.
    pub fn trace_directory(&self) -> PathBuf {
        self.trace_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Settings of a CPU or memory triggered policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicyConfig {
    pub enabled: bool,
    /// Rolling average (in percent) above which a session starts.
    pub threshold_percent: f32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Time span covered by the rolling average.
    #[serde(with = "humantime_serde")]
    pub baseline_window: Duration,
    /// How often the metric is sampled into the baseline.
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,
}

impl Default for ThresholdPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 80.0,
            duration: Duration::from_secs(120),
            cooldown: Duration::from_secs(4 * 60 * 60),
            polling_interval: Duration::from_secs(5),
            baseline_window: Duration::from_secs(30),
            sampling_interval: Duration::from_secs(1),
        }
    }
}

/// Settings of the random (quota) policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RandomPolicyConfig {
    pub enabled: bool,
    /// Fraction of the planning window spent profiling.
    pub overhead: f64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
}

impl Default for RandomPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overhead: 0.05,
            duration: Duration::from_secs(120),
            polling_interval: Duration::from_secs(5),
        }
    }
}

/// Settings of the on-demand policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OnDemandPolicyConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Best-effort wait for the remote settings to become available.
    #[serde(with = "humantime_serde")]
    pub settings_init_timeout: Duration,
}

impl Default for OnDemandPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(60),
            settings_init_timeout: Duration::from_secs(5),
        }
    }
}

/// Settings of the post-stop handoff to the uploader process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Path of the uploader executable.
    pub uploader_path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Lower bound of the sample validation wait, raised to 10 minutes if smaller.
    #[serde(with = "humantime_serde")]
    pub validation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub metadata_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub exit_timeout: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            uploader_path: PathBuf::from("trace-uploader"),
            connect_timeout: Duration::from_secs(30),
            validation_timeout: Duration::from_secs(10 * 60),
            metadata_timeout: Duration::from_secs(60),
            exit_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Identity of the upload destination, passed through to the uploader.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub instrumentation_key: String,
    pub endpoint: String,
    pub stamp_id: String,
    pub role_name: String,
    pub role_instance: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ProfilerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let config = ProfilerConfig::from_json_str(
            r#"{
                "initial_delay": "10s",
                "upload_mode": "always",
                "preserve_trace_file": true,
                "cpu": { "threshold_percent": 65.5, "cooldown": "30m" },
                "random": { "enabled": false },
                "providers": [{ "name": "wall", "level": "verbose", "keywords": 5 }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.initial_delay, Duration::from_secs(10));
        assert_eq!(config.upload_mode, UploadMode::Always);
        assert!(config.preserve_trace_file);
        assert_eq!(config.cpu.threshold_percent, 65.5);
        assert_eq!(config.cpu.cooldown, Duration::from_secs(30 * 60));
        // untouched fields keep their defaults
        assert_eq!(config.cpu.duration, Duration::from_secs(120));
        assert!(!config.random.enabled);
        assert!(config.memory.enabled);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "wall");
    }

    #[test]
    fn test_rejects_bad_overhead() {
        let err = ProfilerConfig::from_json_str(r#"{ "random": { "overhead": 1.5 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::OverheadOutOfRange(_)));
    }

    #[test]
    fn test_rejects_zero_duration() {
        let err = ProfilerConfig::from_json_str(r#"{ "random": { "duration": "0s" } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration("random.duration")));
    }

    #[test]
    fn test_listener_variants() {
        assert_eq!(
            ProfilerConfig::default().listener_variants,
            ListenerVariant::PRIORITY
        );
        let config =
            ProfilerConfig::from_json_str(r#"{ "listener_variants": ["activity_path"] }"#)
                .unwrap();
        assert_eq!(config.listener_variants, [ListenerVariant::ActivityPath]);

        let err = ProfilerConfig::from_json_str(r#"{ "listener_variants": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoListenerVariants));
    }
}
