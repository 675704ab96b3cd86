// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-observability counters.
//!
//! Components receive a [`Registry`] at construction and keep the [`Counter`]s
//! they need. A registry nobody reports on is equivalent to having none.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::MIN_TICK_PERIOD;

/// Monotonic counter handle. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<BTreeMap<String, Counter>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it at zero.
    #[allow(clippy::expect_used)]
    pub fn counter(&self, name: &str) -> Counter {
        self.counters
            .lock()
            .expect("lock poisoned")
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    #[allow(clippy::expect_used)]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.counters
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(name, counter)| (name.clone(), counter.value()))
            .collect()
    }

    /// Zeroes every counter. Handles held by components stay registered.
    #[allow(clippy::expect_used)]
    pub fn reset(&self) {
        for counter in self.counters.lock().expect("lock poisoned").values() {
            counter.0.store(0, Ordering::Relaxed);
        }
    }
}

/// Periodically logs how much each counter moved since the last report.
pub struct Reporter {
    registry: Arc<Registry>,
    period: Duration,
    last: BTreeMap<String, i64>,
}

impl Reporter {
    pub fn new(registry: Arc<Registry>, period: Duration) -> Self {
        Self {
            registry,
            period,
            last: BTreeMap::new(),
        }
    }

    /// Reports every period until cancelled, then reports once more.
    pub fn spawn(mut self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period.max(MIN_TICK_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        self.report();
                        debug!("telemetry reporter stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.report();
                    }
                }
            }
        })
    }

    /// Logs and returns the non-zero deltas since the previous report.
    pub fn report(&mut self) -> BTreeMap<String, i64> {
        let snapshot = self.registry.snapshot();
        let deltas: BTreeMap<String, i64> = snapshot
            .iter()
            .filter_map(|(name, value)| {
                let delta = value - self.last.get(name).copied().unwrap_or(0);
                (delta != 0).then(|| (name.clone(), delta))
            })
            .collect();
        if !deltas.is_empty() {
            info!(counters = ?deltas, "nozzle telemetry");
        }
        self.last = snapshot;
        deltas
    }
}
