// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of a logical activity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPhase {
    Start,
    Stop,
}

/// A raw start or stop event, as reported by the host application.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub phase: ActivityPhase,
    pub request_id: Option<String>,
    pub operation_id: Option<String>,
    pub activity_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub operation_name: Option<String>,
    pub role_instance: Option<String>,
    /// Duration measured by the producer, preferred over timestamp arithmetic.
    pub duration: Option<Duration>,
}

impl ActivityEvent {
    fn new(phase: ActivityPhase, request_id: impl Into<String>, activity_path: impl Into<String>) -> Self {
        Self {
            phase,
            request_id: Some(request_id.into()),
            operation_id: None,
            activity_path: Some(activity_path.into()),
            timestamp: Utc::now(),
            operation_name: None,
            role_instance: None,
            duration: None,
        }
    }

    /// A start half, timestamped now.
    pub fn start(request_id: impl Into<String>, activity_path: impl Into<String>) -> Self {
        Self::new(ActivityPhase::Start, request_id, activity_path)
    }

    /// A stop half, timestamped now.
    pub fn stop(request_id: impl Into<String>, activity_path: impl Into<String>) -> Self {
        Self::new(ActivityPhase::Stop, request_id, activity_path)
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn with_role_instance(mut self, role_instance: impl Into<String>) -> Self {
        self.role_instance = Some(role_instance.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// The buffered start half of an activity, waiting for its stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialActivity {
    pub request_id: Option<String>,
    pub operation_id: Option<String>,
    pub start_activity_path: Option<String>,
    pub start_time_utc: DateTime<Utc>,
    pub operation_name: Option<String>,
    pub role_instance: Option<String>,
}

impl From<&ActivityEvent> for PartialActivity {
    fn from(start: &ActivityEvent) -> Self {
        Self {
            request_id: start.request_id.clone(),
            operation_id: start.operation_id.clone(),
            start_activity_path: start.activity_path.clone(),
            start_time_utc: start.timestamp,
            operation_name: start.operation_name.clone(),
            role_instance: start.role_instance.clone(),
        }
    }
}

/// One correlated unit of work observed during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleActivity {
    pub request_id: String,
    pub operation_id: String,
    pub start_activity_path: String,
    pub stop_activity_path: String,
    pub start_time_utc: DateTime<Utc>,
    pub stop_time_utc: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub operation_name: String,
    pub role_instance: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidSample {
    #[error("sample is missing {0}")]
    MissingField(&'static str),
    #[error("sample stops before it starts")]
    StopBeforeStart,
    #[error("sample has a zero duration")]
    ZeroDuration,
}

impl SampleActivity {
    /// Checks that both halves were matched and the duration is meaningful.
    pub fn validate(&self) -> Result<(), InvalidSample> {
        let required = [
            ("request id", &self.request_id),
            ("operation id", &self.operation_id),
            ("start activity path", &self.start_activity_path),
            ("stop activity path", &self.stop_activity_path),
            ("operation name", &self.operation_name),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(InvalidSample::MissingField(name));
            }
        }
        if self.stop_time_utc < self.start_time_utc {
            return Err(InvalidSample::StopBeforeStart);
        }
        if self.duration.is_zero() {
            return Err(InvalidSample::ZeroDuration);
        }
        Ok(())
    }
}

/// Merges a buffered start half with its stop half.
///
/// Fields set on the stop event win over those captured at start, except for
/// the identifiers that only the start half carries reliably. The result is
/// not validated.
pub fn pair(partial: PartialActivity, stop: &ActivityEvent) -> SampleActivity {
    let duration = match stop.duration {
        Some(duration) => duration,
        None => (stop.timestamp - partial.start_time_utc)
            .to_std()
            .unwrap_or(Duration::ZERO),
    };
    SampleActivity {
        request_id: partial
            .request_id
            .or_else(|| stop.request_id.clone())
            .unwrap_or_default(),
        operation_id: partial
            .operation_id
            .or_else(|| stop.operation_id.clone())
            .unwrap_or_default(),
        start_activity_path: partial.start_activity_path.unwrap_or_default(),
        stop_activity_path: stop.activity_path.clone().unwrap_or_default(),
        start_time_utc: partial.start_time_utc,
        stop_time_utc: stop.timestamp,
        duration,
        operation_name: stop
            .operation_name
            .clone()
            .or(partial.operation_name)
            .unwrap_or_default(),
        role_instance: stop
            .role_instance
            .clone()
            .or(partial.role_instance)
            .unwrap_or_default(),
    }
}
