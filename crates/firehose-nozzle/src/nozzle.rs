// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline orchestrator.
//!
//! A [`Nozzle`] reads envelopes from a [`Producer`] and sends each one down
//! the paths its kind is configured for:
//!
//! ```text
//! metric kinds: filter -> metric translator -> buffer -> router -> metric/log sinks
//! log kinds:    filter -> log translator -> log sink
//! ```
//!
//! A kind configured for both destinations is logged by the router once its
//! metric event is flushed. If the metric path drops the envelope, it is
//! logged directly instead. Either way the logging filters decide first.
//!
//! With per-app HTTP metrics enabled, every `HttpStartStop` envelope also
//! updates the request counters in the telemetry registry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::AutoCulledMetricsBuffer;
use crate::config::NozzleConfig;
use crate::constants::{EVENTS_RECEIVED, SHUTDOWN_DEADLINE, SHUTDOWN_POLL_INTERVAL};
use crate::counter_tracker::CounterTracker;
use crate::envelope::{Envelope, EventKind};
use crate::errors::{NozzleError, ProducerError, SinkError};
use crate::filter::{FilterSet, FilterSink};
use crate::http_metrics::HttpMetricsSink;
use crate::labels::{AppInfoRepository, LabelMaker};
use crate::router::Router;
use crate::sink::{LogSink, MetricSink, Producer};
use crate::telemetry::{Counter, Registry};
use crate::translate::{LogTranslator, MetricTranslator};

/// How a graceful stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The final flush completed before the deadline.
    Drained,
    /// The deadline passed with events buffered or still being posted.
    TimedOut,
}

struct Pipeline {
    metric_filter: FilterSink,
    log_filter: FilterSink,
    metric_translator: MetricTranslator,
    log_translator: LogTranslator,
    buffer: Arc<AutoCulledMetricsBuffer>,
    log_sink: Arc<dyn LogSink>,
    routed_log_kinds: HashSet<EventKind>,
    http_metrics: Option<HttpMetricsSink>,
    registry: Arc<Registry>,
    events_received: Counter,
}

impl Pipeline {
    fn handle_envelope(&self, envelope: &Envelope) {
        self.events_received.increment();
        let kind = envelope.kind();
        let log_admitted = self.log_filter.admits(envelope);

        let mut logged_by_router = false;
        if self.metric_filter.admits(envelope) {
            if let Some(event) = self.metric_translator.translate(envelope) {
                logged_by_router = log_admitted && self.routed_log_kinds.contains(&kind);
                self.buffer.post(vec![event.with_loggable(log_admitted)]);
            }
        }

        if log_admitted && !logged_by_router {
            self.log_sink.post_log(self.log_translator.translate(envelope));
        }

        if let Some(http_metrics) = &self.http_metrics {
            http_metrics.receive(envelope);
        }
    }

    fn record_producer_error(&self, err: &ProducerError) {
        self.registry.counter(err.counter_name()).increment();
    }
}

#[derive(Default)]
struct Session {
    running: bool,
    cancel_token: CancellationToken,
    buffer_task: Option<JoinHandle<()>>,
    expiry_task: Option<JoinHandle<()>>,
}

pub struct Nozzle {
    pipeline: Arc<Pipeline>,
    buffer: Arc<AutoCulledMetricsBuffer>,
    buffer_errors: Mutex<Option<mpsc::Receiver<SinkError>>>,
    counter_tracker: Option<Arc<CounterTracker>>,
    session: Mutex<Session>,
}

impl Nozzle {
    /// Builds the pipeline. Every configuration problem is reported here;
    /// nothing is spawned until [`Nozzle::start`].
    pub fn new(
        config: &NozzleConfig,
        log_sink: Arc<dyn LogSink>,
        metric_sink: Arc<dyn MetricSink>,
        app_info: Arc<dyn AppInfoRepository>,
        registry: Arc<Registry>,
    ) -> Result<Self, NozzleError> {
        config.validate()?;
        let log_kinds = config.logging_kinds()?;
        let metric_kinds = config.monitoring_kinds()?;
        let filters = FilterSet::from_rules(&config.event_filters)?;

        let label_maker = Arc::new(LabelMaker::new(app_info, config.foundation_name.clone()));
        let counter_tracker = config
            .enable_cumulative_counters
            .then(|| Arc::new(CounterTracker::new(config.counter_tracker_ttl, &registry)));
        let metric_translator = MetricTranslator::new(
            config.metric_path_prefix.clone(),
            Arc::clone(&label_maker),
            counter_tracker.clone(),
            &config.runtime_metric_regex,
        )?;
        let http_metrics = config
            .enable_app_http_metrics
            .then(|| HttpMetricsSink::new(Arc::clone(&label_maker), Arc::clone(&registry)));
        let log_translator = LogTranslator::new(label_maker, config.newline_token.clone());

        let router = Arc::new(Router::new(
            metric_sink,
            &metric_kinds,
            Arc::clone(&log_sink),
            &log_kinds,
        ));
        let (buffer, buffer_errors) =
            AutoCulledMetricsBuffer::new(config.metrics_buffer_duration, router, &registry);

        let pipeline = Pipeline {
            metric_filter: FilterSink::new(
                &metric_kinds,
                filters.monitoring_deny,
                filters.monitoring_allow,
                &registry,
            ),
            log_filter: FilterSink::new(
                &log_kinds,
                filters.logging_deny,
                filters.logging_allow,
                &registry,
            ),
            metric_translator,
            log_translator,
            buffer: Arc::clone(&buffer),
            log_sink,
            routed_log_kinds: metric_kinds
                .iter()
                .copied()
                .filter(|kind| log_kinds.contains(kind))
                .collect(),
            http_metrics,
            events_received: registry.counter(EVENTS_RECEIVED),
            registry,
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            buffer,
            buffer_errors: Mutex::new(Some(buffer_errors)),
            counter_tracker,
            session: Mutex::new(Session::default()),
        })
    }

    /// Takes the receiver of metric flush errors. If nobody takes it before
    /// [`Nozzle::start`], the nozzle logs those errors itself.
    #[allow(clippy::expect_used)]
    pub fn take_sink_errors(&self) -> Option<mpsc::Receiver<SinkError>> {
        self.buffer_errors.lock().expect("lock poisoned").take()
    }

    /// Connects to `producer` and spawns the flush loop, the counter expiry
    /// loop and the run loop, all bound to one cancellation token.
    ///
    /// The returned handle resolves when the run loop ends: `Ok(())` after
    /// [`Nozzle::stop`], an error when the producer fails fatally or its
    /// event stream ends.
    pub fn start<P: Producer + ?Sized>(
        &self,
        producer: &mut P,
    ) -> Result<JoinHandle<Result<(), NozzleError>>, NozzleError> {
        let mut session = self.lock_session();
        if session.running {
            return Err(NozzleError::AlreadyRunning);
        }

        let cancel_token = CancellationToken::new();
        let (events, errors) = producer.connect();

        let buffer_task = self.buffer.spawn(cancel_token.clone());
        let expiry_task = self
            .counter_tracker
            .as_ref()
            .map(|tracker| tracker.spawn(cancel_token.clone()));
        if let Some(sink_errors) = self.take_sink_errors() {
            tokio::spawn(log_sink_errors(sink_errors));
        }
        let handle = tokio::spawn(run(
            Arc::clone(&self.pipeline),
            events,
            errors,
            cancel_token.clone(),
        ));

        *session = Session {
            running: true,
            cancel_token,
            buffer_task: Some(buffer_task),
            expiry_task,
        };
        info!("nozzle started");
        Ok(handle)
    }

    /// Cancels all background work and waits, bounded, for the final flush
    /// of the metrics buffer to reach the metric sink.
    pub async fn stop(&self) -> Result<ShutdownOutcome, NozzleError> {
        self.stop_within(SHUTDOWN_POLL_INTERVAL, SHUTDOWN_DEADLINE)
            .await
    }

    async fn stop_within(
        &self,
        poll: Duration,
        deadline: Duration,
    ) -> Result<ShutdownOutcome, NozzleError> {
        let (cancel_token, buffer_task, expiry_task) = {
            let mut session = self.lock_session();
            if !session.running {
                return Err(NozzleError::NotRunning);
            }
            session.running = false;
            (
                session.cancel_token.clone(),
                session.buffer_task.take(),
                session.expiry_task.take(),
            )
        };

        info!("stopping nozzle, flushing metrics buffer");
        cancel_token.cancel();

        let drained = timeout(deadline, async {
            for (name, task) in [("metrics buffer", buffer_task), ("counter expiry", expiry_task)]
            {
                if let Some(task) = task {
                    if let Err(e) = task.await {
                        error!("{name} task failed: {e}");
                    }
                }
            }
            let mut ticker = interval(poll);
            while !self.buffer.is_empty() {
                ticker.tick().await;
            }
        })
        .await;

        let outcome = match drained {
            Ok(()) => ShutdownOutcome::Drained,
            Err(_) => ShutdownOutcome::TimedOut,
        };
        match outcome {
            ShutdownOutcome::Drained => info!("metrics buffer flushed before shutdown"),
            ShutdownOutcome::TimedOut => warn!(
                buffered = self.buffer.len(),
                "metrics buffer was not flushed before the shutdown deadline"
            ),
        }
        Ok(outcome)
    }

    pub fn is_running(&self) -> bool {
        self.lock_session().running
    }

    #[allow(clippy::expect_used)]
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("lock poisoned")
    }
}

async fn run(
    pipeline: Arc<Pipeline>,
    mut events: mpsc::Receiver<Envelope>,
    mut errors: mpsc::Receiver<ProducerError>,
    cancel_token: CancellationToken,
) -> Result<(), NozzleError> {
    let mut errors_open = true;
    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                debug!("nozzle run loop cancelled");
                return Ok(());
            }
            err = errors.recv(), if errors_open => match err {
                Some(err) => {
                    pipeline.record_producer_error(&err);
                    if err.is_fatal() {
                        error!("firehose error, stopping nozzle: {err}");
                        return Err(NozzleError::Producer(err));
                    }
                    warn!("firehose error: {err}");
                }
                None => errors_open = false,
            },
            envelope = events.recv() => match envelope {
                // the final flush may already have run
                Some(_) if cancel_token.is_cancelled() => {
                    debug!("nozzle run loop cancelled");
                    return Ok(());
                }
                Some(envelope) => pipeline.handle_envelope(&envelope),
                None => {
                    info!("firehose event stream ended");
                    return Err(NozzleError::ProducerClosed);
                }
            },
        }
    }
}

async fn log_sink_errors(mut errors: mpsc::Receiver<SinkError>) {
    while let Some(err) = errors.recv().await {
        error!("failed to post metric events: {err}");
    }
}
