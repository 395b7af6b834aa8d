// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use triggered_profiler_agent::{
    config::{ProfilerConfig, UploadMode},
    listener::ActivityEvent,
    profiler::ProfilerBuilder,
};

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Simple program to test the profiler agent
#[derive(Parser, Debug)]
struct Args {
    /// JSON configuration file; defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Uploader executable, overriding the configuration.
    #[arg(long)]
    uploader: Option<PathBuf>,
    #[arg(long)]
    instrumentation_key: Option<String>,
    /// Keep trace files after each session.
    #[arg(long)]
    preserve: bool,
    /// Profile a random share of the time. Useful to see sessions quickly.
    #[arg(long)]
    random_overhead: Option<f64>,
    /// Stop after this long.
    #[arg(long, value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    set_up_tracing();
    tracing::info!("main started");

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_json_file(path)?,
        None => ProfilerConfig::default(),
    };
    if let Some(uploader) = args.uploader {
        config.handoff.uploader_path = uploader;
    }
    if let Some(key) = args.instrumentation_key {
        config.upload.instrumentation_key = key;
    } else if config.upload.instrumentation_key.is_empty() {
        tracing::warn!("no instrumentation key, traces will not be uploaded");
        config.upload_mode = UploadMode::Never;
    }
    if let Some(overhead) = args.random_overhead {
        config.random.overhead = overhead;
        config.random.duration = Duration::from_secs(30);
    }
    config.preserve_trace_file |= args.preserve;

    let profiler = ProfilerBuilder::default()
        .with_config(config)
        .with_cpu_metrics(|| rand::rng().random_range(10.0..95.0_f32))
        .build();
    let sink = profiler.activity_sink();

    let cancel = CancellationToken::new();
    tracing::info!("starting profiler");
    let task = profiler.spawn(cancel.clone())?;
    tracing::info!("profiler started");

    let workload = async {
        let mut request = 0u64;
        loop {
            request += 1;
            let id = format!("request-{request}");
            let path = format!("/{request}/");
            sink.record(ActivityEvent::start(&id, &path).with_operation_id(format!("op-{request}")));
            let work = Duration::from_millis(rand::rng().random_range(5..200));
            tokio::time::sleep(work).await;
            sink.record(
                ActivityEvent::stop(&id, &path)
                    .with_operation_name("GET /simple")
                    .with_role_instance("simple-0"),
            );
        }
    };

    match args.run_for {
        Some(run_for) => {
            let _ = tokio::time::timeout(run_for, workload).await;
        }
        None => {
            tokio::select! {
                _ = workload => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    tracing::info!("stopping profiler");
    cancel.cancel();
    task.await?;
    Ok(())
}
