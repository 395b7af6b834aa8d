// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! [`TraceControl`] backed by [async-profiler], loaded at runtime from
//! `libasyncProfiler.so`.
//!
//! [async-profiler]: https://github.com/async-profiler/async-profiler

use std::ffi::{c_char, CStr, CString};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::session::{ProviderSelector, SessionError, TraceControl, TraceLevel};

pub(crate) mod raw;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AsProfError {
    #[error("async-profiler error: {0}")]
    AsyncProfilerError(String),
    #[error("invalid async-profiler argument: {0}")]
    InvalidArgument(String),
    #[error("error loading libasyncProfiler: {0}")]
    LibraryError(#[from] Arc<libloading::Error>),
}

/// Drives async-profiler through `asprof_execute`.
///
/// Provider selectors map onto async-profiler events: the first selector
/// names the sampled event (`cpu`, `wall`, `itimer`...) with its keywords as
/// the sampling interval, and later `alloc` or `lock` selectors enable those
/// profilers with their keywords as threshold.
#[derive(Debug, Default)]
pub struct AsProfTraceControl {
    running: AtomicBool,
}

impl AsProfTraceControl {
    /// Loads and initializes async-profiler.
    pub fn new() -> Result<Self, AsProfError> {
        unsafe {
            (raw::async_profiler()?.asprof_init)();
        }
        tracing::info!("successfully initialized async profiler");
        Ok(Self::default())
    }

    /// convert an asprof_error_t to a Result
    ///
    /// SAFETY: response must be a valid asprof_error_t
    unsafe fn asprof_error(response: raw::asprof_error_t) -> Result<(), AsProfError> {
        if response.is_null() {
            return Ok(());
        }
        let response = (raw::async_profiler()?.asprof_error_str)(response);
        if response.is_null() {
            return Ok(());
        }
        let response = unsafe { CStr::from_ptr(response) }.to_string_lossy();
        tracing::error!("received error from async-profiler: {}", response);
        Err(AsProfError::AsyncProfilerError(response.into_owned()))
    }

    fn execute(args: &str) -> Result<(), AsProfError> {
        unsafe extern "C" fn callback(buf: *const c_char, size: usize) {
            if !buf.is_null() {
                let parts = unsafe { std::slice::from_raw_parts(buf as *const u8, size) };
                tracing::debug!(
                    "response from async-profiler: {}",
                    String::from_utf8_lossy(parts)
                );
            }
        }

        let args = CString::new(args).map_err(|e| AsProfError::InvalidArgument(e.to_string()))?;
        unsafe {
            Self::asprof_error((raw::async_profiler()?.asprof_execute)(
                args.as_ptr(),
                Some(callback),
            ))
        }
    }
}

fn log_level(level: TraceLevel) -> &'static str {
    match level {
        TraceLevel::Critical | TraceLevel::Error => "ERROR",
        TraceLevel::Warning => "WARN",
        TraceLevel::Informational => "INFO",
        TraceLevel::Verbose => "DEBUG",
    }
}

/// Builds the `start` command for a trace written as JFR to `trace_path`.
pub(crate) fn start_args(
    trace_path: &Path,
    providers: &[ProviderSelector],
) -> Result<String, AsProfError> {
    let (event, extra) = providers
        .split_first()
        .ok_or_else(|| AsProfError::InvalidArgument("no provider selected".into()))?;

    let mut args = format!("start,event={}", event.name);
    if event.keywords > 0 {
        let _ = write!(args, ",interval={}", event.keywords);
    }
    for provider in extra {
        match provider.name.as_str() {
            name @ ("alloc" | "lock") if provider.keywords > 0 => {
                let _ = write!(args, ",{name}={}", provider.keywords);
            }
            name @ ("alloc" | "lock") => {
                let _ = write!(args, ",{name}");
            }
            other => {
                tracing::warn!(provider = other, "ignoring provider async-profiler can not record alongside the main event");
            }
        }
    }
    let level = providers
        .iter()
        .map(|p| p.level)
        .max_by_key(|l| *l as u8)
        .unwrap_or_default();
    let path = trace_path
        .to_str()
        .ok_or_else(|| AsProfError::InvalidArgument(format!("{trace_path:?} is not UTF-8")))?;
    if path.contains(',') {
        return Err(AsProfError::InvalidArgument(format!(
            "{path} contains a comma"
        )));
    }
    let _ = write!(args, ",loglevel={},file={path},jfr", log_level(level));
    Ok(args)
}

impl TraceControl for AsProfTraceControl {
    fn enable(
        &self,
        trace_path: &Path,
        providers: &[ProviderSelector],
    ) -> Result<DateTime<Utc>, SessionError> {
        let args = start_args(trace_path, providers)?;
        tracing::debug!(%args, "starting async-profiler");
        Self::execute(&args)?;
        self.running.store(true, Ordering::Release);
        Ok(Utc::now())
    }

    fn disable(&self) -> Result<(), SessionError> {
        Self::execute("stop")?;
        self.running.store(false, Ordering::Release);
        tracing::debug!("async-profiler stopped successfully");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn file_extension(&self) -> &'static str {
        "jfr"
    }
}
