// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Triggered profiler agent
//! An in-process agent that decides when to capture a profiling trace, collects per-request
//! samples while the trace runs, and hands the finished trace to an out-of-process uploader.
//!
//! ### OS/CPU Support
//!
//! This agent currently only supports Linux. The uploader handoff uses a Unix domain socket,
//! and the default trace backend is [async-profiler].
//!
//! [async-profiler]: https://github.com/async-profiler/async-profiler
//!
//! ### Usage
//!
//! Several scheduling policies run concurrently, each deciding from its own trigger when a
//! session should run:
//!
//! 1. CPU and memory thresholds, comparing a rolling baseline against a configured threshold.
//!    These only run when a metrics provider is given to the builder.
//! 2. Random sampling, spending a configured fraction of a 12 hour window profiling.
//! 3. On-demand, acting once on each remote collection plan. This only runs when a
//!    [`CollectionPlanSource`](policy::CollectionPlanSource) is given to the builder.
//!
//! At most one session runs at a time: whichever policy asks first owns it until that policy
//! stops it.
//!
//! When no trace control is given, the profiler [dlopen(3)]'s `libasyncProfiler.so` when
//! spawned and returns an [`Err`] if it is not found, so make sure there is a
//! `libasyncProfiler.so` in the search path[^1].
//!
//! [^1]: the dlopen search path includes RPATH and LD_LIBRARY_PATH, but *not* the current directory to avoid current directory attacks.
//!
//! [dlopen(3)]: https://linux.die.net/man/3/dlopen
//!
//! ```no_run
//! # use triggered_profiler_agent::config::ProfilerConfig;
//! # use triggered_profiler_agent::listener::ActivityEvent;
//! # use triggered_profiler_agent::profiler::{ProfilerBuilder, SpawnError};
//! # use tokio_util::sync::CancellationToken;
//! # #[tokio::main]
//! # async fn main() -> Result<(), SpawnError> {
//! let mut config = ProfilerConfig::default();
//! config.upload.instrumentation_key = "<your instrumentation key>".into();
//!
//! let profiler = ProfilerBuilder::default()
//!     .with_config(config)
//!     .with_cpu_metrics(|| 42.0_f32)
//!     .build();
//! let sink = profiler.activity_sink();
//!
//! let cancel = CancellationToken::new();
//! let task = profiler.spawn(cancel.clone())?;
//!
//! // report the start and stop of each request
//! sink.record(ActivityEvent::start("request-1", "/1/").with_operation_id("op-1"));
//! sink.record(ActivityEvent::stop("request-1", "/1/").with_operation_name("GET /"));
//!
//! cancel.cancel();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```
//!
//! ### Handoff
//!
//! When a session stops, the trace is handed to the uploader executable named by
//! [`HandoffConfig::uploader_path`](config::HandoffConfig::uploader_path). The uploader is
//! started with the [`UploadContext`](handoff::UploadContext) on its command line, connects to
//! the socket named by `--channel`, and speaks the framed JSON exchange described in
//! [`handoff::protocol`]. Uploaders written in Rust can use
//! [`UploaderEndpoint`](handoff::UploaderEndpoint).
//!
//! Sessions without samples are not uploaded unless the upload mode is `always`. The trace
//! file is deleted afterwards unless `preserve_trace_file` is set.
mod asprof;

pub mod baseline;
pub mod config;
pub mod handoff;
pub mod listener;
pub mod metadata;
pub mod orchestrator;
pub mod policy;
pub mod profiler;
pub mod session;
