// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-windowed metrics buffer that keeps only the latest sample per series.
//!
//! The backend rejects two points for one series inside a short window, and
//! the firehose delivers events out of order. Within a flush window the
//! buffer therefore retains, per fingerprint, the event with the greatest
//! event time and drops everything else.
//!
//! Once cancelled, the buffer flushes one last time and rejects further
//! posts until it is spawned again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fnv::FnvBuildHasher;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::{ERROR_CHANNEL_CAPACITY, EVENTS_SAMPLED, MIN_TICK_PERIOD};
use crate::errors::SinkError;
use crate::metric::MetricEvent;
use crate::sink::MetricSink;
use crate::telemetry::{Counter, Registry};

type Window = HashMap<String, MetricEvent, FnvBuildHasher>;

pub struct AutoCulledMetricsBuffer {
    period: Duration,
    downstream: Arc<dyn MetricSink>,
    window: Mutex<Window>,
    // only changed while holding the window lock
    closed: AtomicBool,
    errors: mpsc::Sender<SinkError>,
    sampled: Counter,
}

impl AutoCulledMetricsBuffer {
    /// Creates a buffer flushing into `downstream` every `period`. Failed
    /// flushes are reported on the returned receiver, one error per flush.
    pub fn new(
        period: Duration,
        downstream: Arc<dyn MetricSink>,
        registry: &Registry,
    ) -> (Arc<Self>, mpsc::Receiver<SinkError>) {
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let buffer = Arc::new(Self {
            period,
            downstream,
            window: Mutex::new(Window::default()),
            closed: AtomicBool::new(false),
            errors: errors_tx,
            sampled: registry.counter(EVENTS_SAMPLED),
        });
        (buffer, errors_rx)
    }

    /// Adds `events` to the current window. A stored event is replaced only
    /// by a strictly newer one; every collision counts as sampled. Events
    /// posted after the final flush are dropped.
    pub fn post(&self, events: Vec<MetricEvent>) {
        let mut window = self.lock_window();
        if self.closed.load(Ordering::Acquire) {
            debug!(events = events.len(), "metrics buffer closed, dropping events");
            return;
        }
        for event in events {
            match window.entry(event.fingerprint()) {
                Entry::Vacant(slot) => {
                    slot.insert(event);
                }
                Entry::Occupied(mut slot) => {
                    self.sampled.increment();
                    if event.primary_event_time() > slot.get().primary_event_time() {
                        slot.insert(event);
                    }
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock_window().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock_window().len()
    }

    /// Sends the current window downstream. The window is swapped out under
    /// the lock and posted after releasing it, so `post` never waits on the
    /// downstream sink.
    pub async fn flush(&self) {
        self.flush_window(false).await;
    }

    async fn flush_window(&self, close: bool) {
        let events: Vec<MetricEvent> = {
            let mut window = self.lock_window();
            if close {
                self.closed.store(true, Ordering::Release);
            }
            std::mem::take(&mut *window).into_values().collect()
        };
        if events.is_empty() {
            return;
        }

        debug!(events = events.len(), "flushing metrics buffer");
        if let Err(e) = self.downstream.post_metric_events(events).await {
            error!("failed to flush metrics buffer: {e}");
            match self.errors.try_send(e) {
                Ok(()) => {}
                Err(TrySendError::Full(e)) => {
                    warn!("metrics buffer error channel is full, dropping error: {e}");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Flushes every period until `cancel_token` fires, then flushes once
    /// more and exits. The handle resolves after the final downstream post.
    pub fn spawn(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        {
            let _window = self.lock_window();
            self.closed.store(false, Ordering::Release);
        }
        tokio::spawn(async move {
            let mut ticker = interval(buffer.period.max(MIN_TICK_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => {
                        debug!("metrics buffer cancelled, flushing remaining events");
                        buffer.flush_window(true).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        buffer.flush().await;
                    }
                }
            }
        })
    }

    #[allow(clippy::expect_used)]
    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().expect("lock poisoned")
    }
}
