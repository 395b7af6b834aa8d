// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Correlates raw start/stop activity events into [`SampleActivity`] values
//! while a session is active.
//!
//! Events reach the session through an [`ActivitySink`], which forwards them
//! to the session's [`ListenerChain`]. The chain holds a priority-ordered list
//! of [`ListenerVariant`]s; when the active listener reports itself poisoned,
//! the chain disposes it and activates the next variant, keeping the samples
//! already collected.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

pub mod container;
pub mod sample;

pub use container::SampleActivityContainer;
pub use sample::{ActivityEvent, ActivityPhase, InvalidSample, PartialActivity, SampleActivity};

/// Stop events without a buffered start are expected right after a session
/// starts, for activities that began before it.
const EXPECTED_UNMATCHED_STOPS: u64 = 5;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListenerError {
    #[error("listener {0} was already disposed")]
    Disposed(ListenerVariant),
    #[error("no listener variant configured")]
    NoVariants,
}

/// How a listener derives the correlation key of an event.
///
/// Producers disagree on which identifier is present on both halves of an
/// activity, so each variant keys the pending map differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerVariant {
    /// Key by request id, carried on both halves.
    RequestId,
    /// Key by activity path, for producers that stamp the request id on the
    /// start half only.
    ActivityPath,
}

impl ListenerVariant {
    /// Default fail-over order.
    pub const PRIORITY: [ListenerVariant; 2] =
        [ListenerVariant::RequestId, ListenerVariant::ActivityPath];

    fn key<'a>(&self, event: &'a ActivityEvent) -> Option<&'a str> {
        let key = match self {
            ListenerVariant::RequestId => event.request_id.as_deref(),
            ListenerVariant::ActivityPath => event.activity_path.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }
}

impl fmt::Display for ListenerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerVariant::RequestId => write!(f, "request-id"),
            ListenerVariant::ActivityPath => write!(f, "activity-path"),
        }
    }
}

/// What a listener tells its owner after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerSignal {
    Continue,
    /// Raised exactly once, on the event that exhausted the listener's health.
    Poisoned,
}

/// Capability shared by all listener variants.
pub trait SessionListener: Send + Sync {
    fn variant(&self) -> ListenerVariant;

    /// Starts accepting events. Events seen before this are ignored.
    fn enable_events(&self) -> Result<(), ListenerError>;

    fn on_event(&self, event: &ActivityEvent) -> ListenerSignal;

    /// The container samples are appended to, shared across variants.
    fn samples(&self) -> &Arc<SampleActivityContainer>;

    fn is_poisoned(&self) -> bool;

    /// Stops accepting events and drops the pending start halves.
    fn dispose(&self);
}

/// Listener that pairs start and stop halves through a concurrent map.
pub struct CorrelatingListener {
    variant: ListenerVariant,
    pending: DashMap<String, PartialActivity>,
    samples: Arc<SampleActivityContainer>,
    health_points: u32,
    health: AtomicU32,
    enabled: AtomicBool,
    disposed: AtomicBool,
    poisoned: AtomicBool,
    unmatched_stops: AtomicU64,
}

impl CorrelatingListener {
    pub fn new(
        variant: ListenerVariant,
        samples: Arc<SampleActivityContainer>,
        health_points: u32,
    ) -> Self {
        let health_points = health_points.max(1);
        Self {
            variant,
            pending: DashMap::new(),
            samples,
            health_points,
            health: AtomicU32::new(health_points),
            enabled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            unmatched_stops: AtomicU64::new(0),
        }
    }

    /// Number of start halves waiting for their stop.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn on_start(&self, key: &str, event: &ActivityEvent) -> ListenerSignal {
        // a stale partial for the same key is overwritten
        self.pending
            .insert(key.to_owned(), PartialActivity::from(event));
        ListenerSignal::Continue
    }

    fn on_stop(&self, key: &str, event: &ActivityEvent) -> ListenerSignal {
        let Some((_, partial)) = self.pending.remove(key) else {
            let unmatched = self.unmatched_stops.fetch_add(1, Ordering::Relaxed) + 1;
            if unmatched <= EXPECTED_UNMATCHED_STOPS {
                tracing::debug!(variant = %self.variant, key, "stop without start, activity predates the session");
            } else {
                tracing::trace!(variant = %self.variant, key, unmatched, "stop without start");
            }
            return ListenerSignal::Continue;
        };

        match self.samples.try_push(sample::pair(partial, event)) {
            Ok(()) => {
                self.health.store(self.health_points, Ordering::Relaxed);
                ListenerSignal::Continue
            }
            Err(err) => {
                tracing::debug!(variant = %self.variant, key, %err, "dropping invalid sample");
                self.lose_health()
            }
        }
    }

    fn lose_health(&self) -> ListenerSignal {
        let previous = self
            .health
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| h.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 && !self.poisoned.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                variant = %self.variant,
                health_points = self.health_points,
                "listener poisoned by repeated correlation failures"
            );
            return ListenerSignal::Poisoned;
        }
        ListenerSignal::Continue
    }
}

impl SessionListener for CorrelatingListener {
    fn variant(&self) -> ListenerVariant {
        self.variant
    }

    fn enable_events(&self) -> Result<(), ListenerError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ListenerError::Disposed(self.variant));
        }
        self.enabled.store(true, Ordering::Release);
        tracing::debug!(variant = %self.variant, "listener enabled");
        Ok(())
    }

    fn on_event(&self, event: &ActivityEvent) -> ListenerSignal {
        if !self.enabled.load(Ordering::Acquire)
            || self.disposed.load(Ordering::Acquire)
            || self.poisoned.load(Ordering::Acquire)
        {
            return ListenerSignal::Continue;
        }
        let Some(key) = self.variant.key(event) else {
            // the producer does not emit what this variant keys on
            return self.lose_health();
        };
        match event.phase {
            ActivityPhase::Start => self.on_start(key, event),
            ActivityPhase::Stop => self.on_stop(key, event),
        }
    }

    fn samples(&self) -> &Arc<SampleActivityContainer> {
        &self.samples
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.enabled.store(false, Ordering::Release);
            let dropped = self.pending.len();
            self.pending.clear();
            tracing::debug!(variant = %self.variant, dropped, "listener disposed");
        }
    }
}

struct ActiveListener {
    index: usize,
    listener: Arc<dyn SessionListener>,
}

/// Priority-ordered listener variants for one session.
pub struct ListenerChain {
    variants: Vec<ListenerVariant>,
    samples: Arc<SampleActivityContainer>,
    health_points: u32,
    active: RwLock<Option<ActiveListener>>,
    failovers: AtomicUsize,
}

impl ListenerChain {
    /// Builds the chain and enables the highest-priority variant.
    pub fn new(variants: Vec<ListenerVariant>, health_points: u32) -> Result<Self, ListenerError> {
        let samples = Arc::new(SampleActivityContainer::new());
        let first = *variants.first().ok_or(ListenerError::NoVariants)?;
        let listener = Self::activate(first, &samples, health_points)?;
        Ok(Self {
            variants,
            samples,
            health_points,
            active: RwLock::new(Some(ActiveListener { index: 0, listener })),
            failovers: AtomicUsize::new(0),
        })
    }

    fn activate(
        variant: ListenerVariant,
        samples: &Arc<SampleActivityContainer>,
        health_points: u32,
    ) -> Result<Arc<dyn SessionListener>, ListenerError> {
        let listener = Arc::new(CorrelatingListener::new(
            variant,
            samples.clone(),
            health_points,
        ));
        listener.enable_events()?;
        Ok(listener)
    }

    /// The variant currently receiving events, if any is left.
    pub fn active_variant(&self) -> Option<ListenerVariant> {
        self.active.read().as_ref().map(|a| a.listener.variant())
    }

    /// How many times a poisoned listener was replaced or retired.
    pub fn failovers(&self) -> usize {
        self.failovers.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> &Arc<SampleActivityContainer> {
        &self.samples
    }

    pub fn on_event(&self, event: &ActivityEvent) {
        // Delivery happens under the read guard so `drain` waits for
        // in-flight events before taking the samples.
        let poisoned = {
            let active = self.active.read();
            match active.as_ref() {
                Some(active) if active.listener.on_event(event) == ListenerSignal::Poisoned => {
                    Some(active.index)
                }
                _ => None,
            }
        };
        if let Some(index) = poisoned {
            self.fail_over(index);
        }
    }

    fn fail_over(&self, poisoned_index: usize) {
        let mut active = self.active.write();
        match active.as_ref() {
            Some(current) if current.index == poisoned_index => current.listener.dispose(),
            // someone else already moved past this listener
            _ => return,
        }
        self.failovers.fetch_add(1, Ordering::Relaxed);

        let mut next = poisoned_index + 1;
        while let Some(&variant) = self.variants.get(next) {
            match Self::activate(variant, &self.samples, self.health_points) {
                Ok(listener) => {
                    tracing::warn!(%variant, collected = self.samples.len(), "failing over to next listener");
                    *active = Some(ActiveListener { index: next, listener });
                    return;
                }
                Err(err) => {
                    tracing::warn!(%variant, ?err, "unable to enable listener variant");
                    next += 1;
                }
            }
        }
        tracing::error!("every listener variant is poisoned, no more samples will be collected this session");
        *active = None;
    }

    /// Disposes the active listener and takes every collected sample.
    ///
    /// Events arriving after this are ignored.
    pub fn drain(&self) -> Vec<SampleActivity> {
        if let Some(active) = self.active.write().take() {
            active.listener.dispose();
        }
        self.samples.drain()
    }
}

/// Handle the host application uses to report activity events.
///
/// Cloning is cheap. Events reported while no session is active are dropped.
#[derive(Clone, Default)]
pub struct ActivitySink {
    chain: Arc<RwLock<Option<Arc<ListenerChain>>>>,
}

impl fmt::Debug for ActivitySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivitySink")
            .field("attached", &self.chain.read().is_some())
            .finish()
    }
}

impl ActivitySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: ActivityEvent) {
        let chain = self.chain.read().clone();
        if let Some(chain) = chain {
            chain.on_event(&event);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.chain.read().is_some()
    }

    pub(crate) fn attach(&self, chain: Arc<ListenerChain>) {
        *self.chain.write() = Some(chain);
    }

    /// Detaches the session's chain. Once this returns, no event can reach it
    /// through this sink.
    pub(crate) fn detach(&self) -> Option<Arc<ListenerChain>> {
        self.chain.write().take()
    }
}
