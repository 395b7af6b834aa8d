// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

use super::sample::{InvalidSample, SampleActivity};

/// Valid samples collected during one session.
///
/// Appends come from the event ingestion path and never take a lock: the
/// queue grows by linking new segments, so samples already pushed are never
/// moved or copied while it grows. The one-time read at stop drains it.
#[derive(Debug, Default)]
pub struct SampleActivityContainer {
    samples: SegQueue<SampleActivity>,
    appended: AtomicUsize,
}

impl SampleActivityContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a sample.
    pub fn try_push(&self, sample: SampleActivity) -> Result<(), InvalidSample> {
        sample.validate()?;
        self.samples.push(sample);
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total samples appended since creation, drained or not.
    pub fn appended(&self) -> usize {
        self.appended.load(Ordering::Relaxed)
    }

    /// Removes and returns every sample, in append order.
    pub fn drain(&self) -> Vec<SampleActivity> {
        let mut out = Vec::with_capacity(self.samples.len());
        while let Some(sample) = self.samples.pop() {
            out.push(sample);
        }
        out
    }
}
