// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host metadata and the records sent to the uploader alongside a trace.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::listener::SampleActivity;

/// Where the agent runs. Collected once per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub machine_name: String,
    pub process_name: String,
    pub process_id: u32,
    pub os: String,
}

impl AgentMetadata {
    pub fn from_host() -> Self {
        let machine_name = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map(|s| s.trim().to_owned())
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "unknown".to_owned());
        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_owned());
        Self {
            machine_name,
            process_name,
            process_id: std::process::id(),
            os: std::env::consts::OS.to_owned(),
        }
    }
}

/// Summary of one session, uploaded as the trace's index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub session_id: String,
    pub machine_name: String,
    pub process_name: String,
    pub process_id: u32,
    /// Identity of the policy that triggered the session.
    pub source: String,
    pub average_cpu_usage: f32,
    pub average_memory_usage: f32,
    pub os: String,
    pub role_name: String,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
}

/// Telemetry for one sample, locating it inside the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTelemetry {
    pub session_id: String,
    pub request_id: String,
    pub operation_id: String,
    pub operation_name: String,
    pub role_instance: String,
    pub start_activity_path: String,
    pub stop_activity_path: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

impl SampleTelemetry {
    pub fn new(session_id: &str, sample: &SampleActivity) -> Self {
        Self {
            session_id: session_id.to_owned(),
            request_id: sample.request_id.clone(),
            operation_id: sample.operation_id.clone(),
            operation_name: sample.operation_name.clone(),
            role_instance: sample.role_instance.clone(),
            start_activity_path: sample.start_activity_path.clone(),
            stop_activity_path: sample.stop_activity_path.clone(),
            timestamp: sample.start_time_utc,
            duration_ms: sample.duration.as_secs_f64() * 1000.0,
        }
    }
}

/// Final payload of the handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub index: IndexRecord,
    pub samples: Vec<SampleTelemetry>,
}

/// Contents of the `<trace>.metadata.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSidecar {
    pub trace_file: PathBuf,
    pub samples: Vec<SampleTelemetry>,
}
