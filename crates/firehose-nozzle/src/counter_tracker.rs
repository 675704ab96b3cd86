// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Derives cumulative (start time, total) pairs from raw counter totals.
//!
//! The firehose reports a running total per observation. Emitters restart and
//! reset that total, and the backend requires every cumulative point to carry
//! a start time that only changes when a new lineage begins. The tracker keeps
//! per-series state and turns each raw total into a total for the current
//! lineage:
//!
//! * a raw value lower than the previous one is a reset and contributes its
//!   whole value;
//! * a total that would overflow `i64` starts a new lineage at the previous
//!   event time;
//! * series not seen for longer than the TTL are forgotten, so they restart
//!   from scratch when they reappear.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::{COUNTERS_EXPIRED, MAX_EXPIRY_SWEEP_PERIOD, MIN_TICK_PERIOD};
use crate::telemetry::{Counter, Registry};

#[derive(Debug, Clone)]
struct CounterState {
    start_time: SystemTime,
    total_value: i64,
    last_raw_value: u64,
    last_seen: Instant,
    last_event_time: SystemTime,
}

pub struct CounterTracker {
    counters: Mutex<HashMap<String, CounterState, FnvBuildHasher>>,
    ttl: Duration,
    expired: Counter,
}

impl CounterTracker {
    pub fn new(ttl: Duration, registry: &Registry) -> Self {
        Self {
            counters: Mutex::new(HashMap::default()),
            ttl,
            expired: registry.counter(COUNTERS_EXPIRED),
        }
    }

    /// Records `raw_value` for `name` and returns the lineage total and its
    /// start time. The first observation returns `(0, event_time)`, which
    /// callers must not report.
    pub fn update(&self, name: &str, raw_value: u64, event_time: SystemTime) -> (i64, SystemTime) {
        let mut counters = self.lock_counters();
        let now = Instant::now();

        let Some(state) = counters.get_mut(name) else {
            counters.insert(
                name.to_string(),
                CounterState {
                    start_time: event_time,
                    total_value: 0,
                    last_raw_value: raw_value,
                    last_seen: now,
                    last_event_time: event_time,
                },
            );
            return (0, event_time);
        };

        let delta = if raw_value < state.last_raw_value {
            debug!(
                counter = name,
                previous = state.last_raw_value,
                current = raw_value,
                "counter reset detected"
            );
            raw_value
        } else {
            raw_value - state.last_raw_value
        };

        let total = u64::try_from(state.total_value).unwrap_or_default();
        match total
            .checked_add(delta)
            .and_then(|sum| i64::try_from(sum).ok())
        {
            Some(sum) => state.total_value = sum,
            None => {
                info!(
                    counter = name,
                    total = state.total_value,
                    delta,
                    "counter total would overflow, starting a new lineage"
                );
                state.total_value = i64::try_from(delta).unwrap_or(i64::MAX);
                state.start_time = state.last_event_time;
            }
        }

        state.last_raw_value = raw_value;
        state.last_seen = now;
        state.last_event_time = event_time;
        (state.total_value, state.start_time)
    }

    /// Forgets series idle for longer than the TTL. Returns how many.
    pub fn expire(&self) -> usize {
        let mut counters = self.lock_counters();
        let before = counters.len();
        counters.retain(|name, state| {
            if state.last_seen.elapsed() <= self.ttl {
                return true;
            }
            info!(
                counter = %name,
                total = state.total_value,
                "removing expired counter"
            );
            self.expired.increment();
            false
        });
        before - counters.len()
    }

    pub fn len(&self) -> usize {
        self.lock_counters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Period of the background expiry sweep: half the TTL, capped.
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        (self.ttl / 2).clamp(MIN_TICK_PERIOD, MAX_EXPIRY_SWEEP_PERIOD)
    }

    /// Sweeps expired series until `cancel_token` fires.
    pub fn spawn(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(tracker.sweep_period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => {
                        debug!("counter tracker expiry stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracker.expire();
                    }
                }
            }
        })
    }

    #[allow(clippy::expect_used)]
    fn lock_counters(&self) -> MutexGuard<'_, HashMap<String, CounterState, FnvBuildHasher>> {
        self.counters.lock().expect("lock poisoned")
    }
}
