// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::envelope::EventKind;
use crate::errors::SinkError;
use crate::metric::MetricEvent;
use crate::sink::{Log, LogSink, MetricSink, Severity};

/// Sends metric events to the metric sink, the log sink, or both, depending
/// on their kind. Kinds in neither set are dropped.
pub struct Router {
    metric_sink: Arc<dyn MetricSink>,
    metric_kinds: HashSet<EventKind>,
    log_sink: Arc<dyn LogSink>,
    log_kinds: HashSet<EventKind>,
}

impl Router {
    pub fn new(
        metric_sink: Arc<dyn MetricSink>,
        metric_kinds: &[EventKind],
        log_sink: Arc<dyn LogSink>,
        log_kinds: &[EventKind],
    ) -> Self {
        Self {
            metric_sink,
            metric_kinds: metric_kinds.iter().copied().collect(),
            log_sink,
            log_kinds: log_kinds.iter().copied().collect(),
        }
    }

    /// Posts one log per loggable log-kind event and a single batch with every
    /// metric-kind event. No metric call is made for an empty batch.
    pub async fn dispatch(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        let mut batch = Vec::with_capacity(events.len());
        for event in events {
            if event.loggable && self.log_kinds.contains(&event.kind) {
                self.post_log(&event);
            }
            if self.metric_kinds.contains(&event.kind) {
                batch.push(event);
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        debug!(events = batch.len(), "posting metric events");
        self.metric_sink.post_metric_events(batch).await
    }

    fn post_log(&self, event: &MetricEvent) {
        match serde_json::to_value(event) {
            Ok(payload) => self.log_sink.post_log(Log {
                payload,
                labels: event.labels.clone(),
                severity: Severity::Default,
            }),
            Err(e) => warn!("failed to serialize metric event for logging: {e}"),
        }
    }
}

#[async_trait]
impl MetricSink for Router {
    async fn post_metric_events(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        self.dispatch(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Labels;
    use crate::metric::Metric;
    use crate::test_support::{RecordingLogSink, RecordingMetricSink};
    use std::time::SystemTime;

    fn event(kind: EventKind, name: &str) -> MetricEvent {
        let mut labels = Labels::new();
        labels.insert("job".to_string(), "router".to_string());
        MetricEvent::new(
            labels,
            kind,
            vec![Metric::gauge(name, 1.0, SystemTime::now(), "")],
        )
    }

    #[tokio::test]
    async fn test_batches_metric_kinds_into_one_call() {
        let metrics = Arc::new(RecordingMetricSink::default());
        let logs = Arc::new(RecordingLogSink::default());
        let router = Router::new(
            metrics.clone(),
            &[EventKind::ValueMetric, EventKind::CounterEvent],
            logs.clone(),
            &[],
        );

        router
            .dispatch(vec![
                event(EventKind::ValueMetric, "a"),
                event(EventKind::CounterEvent, "b"),
                event(EventKind::ContainerMetric, "c"),
            ])
            .await
            .unwrap();

        let calls = metrics.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert!(logs.logs().is_empty());
    }

    #[tokio::test]
    async fn test_dual_kind_produces_one_log_and_one_batch() {
        let metrics = Arc::new(RecordingMetricSink::default());
        let logs = Arc::new(RecordingLogSink::default());
        let router = Router::new(
            metrics.clone(),
            &[EventKind::ValueMetric],
            logs.clone(),
            &[EventKind::ValueMetric],
        );

        router
            .dispatch(vec![event(EventKind::ValueMetric, "a")])
            .await
            .unwrap();

        assert_eq!(metrics.calls().len(), 1);
        let logs = logs.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].labels["job"], "router");
        assert_eq!(logs[0].payload["metrics"][0]["name"], "a");
        assert_eq!(logs[0].severity, Severity::Default);
    }

    #[tokio::test]
    async fn test_events_marked_unloggable_are_not_logged() {
        let metrics = Arc::new(RecordingMetricSink::default());
        let logs = Arc::new(RecordingLogSink::default());
        let router = Router::new(
            metrics.clone(),
            &[EventKind::ValueMetric],
            logs.clone(),
            &[EventKind::ValueMetric],
        );

        router
            .dispatch(vec![
                event(EventKind::ValueMetric, "a").with_loggable(false),
                event(EventKind::ValueMetric, "b"),
            ])
            .await
            .unwrap();

        assert_eq!(metrics.events().len(), 2);
        let logs = logs.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].payload["metrics"][0]["name"], "b");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_metric_sink() {
        let metrics = Arc::new(RecordingMetricSink::default());
        let logs = Arc::new(RecordingLogSink::default());
        let router = Router::new(
            metrics.clone(),
            &[EventKind::ValueMetric],
            logs.clone(),
            &[EventKind::CounterEvent],
        );

        router
            .dispatch(vec![event(EventKind::CounterEvent, "a")])
            .await
            .unwrap();
        router.dispatch(vec![]).await.unwrap();

        assert!(metrics.calls().is_empty());
        assert_eq!(logs.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_propagates_metric_sink_errors() {
        let metrics = Arc::new(RecordingMetricSink::failing("backend down"));
        let logs = Arc::new(RecordingLogSink::default());
        let router = Router::new(metrics, &[EventKind::ValueMetric], logs, &[]);

        let err = router
            .dispatch(vec![event(EventKind::ValueMetric, "a")])
            .await
            .unwrap_err();
        assert_eq!(err, SinkError::Unavailable("backend down".to_string()));
    }
}
