// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Trace capture sessions and the collaborator that starts and stops them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asprof::AsProfError;
use crate::listener::{ListenerChain, ListenerError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    AsProf(#[from] AsProfError),
    #[error("trace file error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("trace control: {0}")]
    Control(Box<dyn std::error::Error + Send + Sync>),
}

/// Verbosity requested from a trace provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Informational,
    Verbose,
}

/// One (name, level, keywords) trace provider selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelector {
    pub name: String,
    pub level: TraceLevel,
    pub keywords: u64,
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self {
            name: "cpu".into(),
            level: TraceLevel::Informational,
            keywords: 0,
        }
    }
}

/// Starts and stops the underlying diagnostic trace.
///
/// The trace content is opaque to the agent, it only hands the file over
/// once the session stops.
pub trait TraceControl: Send + Sync + 'static {
    /// Starts writing a trace to `trace_path`, returning the session start.
    fn enable(
        &self,
        trace_path: &Path,
        providers: &[ProviderSelector],
    ) -> Result<DateTime<Utc>, SessionError>;

    fn disable(&self) -> Result<(), SessionError>;

    /// Whether a trace is being written right now.
    fn is_running(&self) -> bool;

    /// Extension of the trace files this backend writes.
    fn file_extension(&self) -> &'static str {
        "trace"
    }
}

/// One active profiling capture.
pub struct TraceSession {
    session_start: DateTime<Utc>,
    trace_path: PathBuf,
    listeners: Arc<ListenerChain>,
}

impl TraceSession {
    pub(crate) fn new(
        session_start: DateTime<Utc>,
        trace_path: PathBuf,
        listeners: Arc<ListenerChain>,
    ) -> Self {
        Self {
            session_start,
            trace_path,
            listeners,
        }
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Identifier of the session shared with the uploader.
    pub fn session_id(&self) -> String {
        session_id(self.session_start)
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    pub fn listeners(&self) -> &Arc<ListenerChain> {
        &self.listeners
    }
}

pub(crate) fn session_id(session_start: DateTime<Utc>) -> String {
    session_start.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Path of a new trace file in `directory`.
pub(crate) fn trace_file_path(directory: &Path, extension: &str) -> PathBuf {
    let time = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-");
    let pid = std::process::id();
    let nonce = uuid::Uuid::new_v4().simple();
    directory.join(format!("trace_{pid}_{time}_{nonce}.{extension}"))
}
