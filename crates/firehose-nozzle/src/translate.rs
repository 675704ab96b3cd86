// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Translation of envelopes into metric events and log records.

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::counter_tracker::CounterTracker;
use crate::envelope::{Envelope, Event, MessageType};
use crate::errors::ConfigError;
use crate::labels::LabelMaker;
use crate::metric::{series_key, Metric, MetricEvent};
use crate::sink::{Log, Severity};
use crate::units::UnitParser;

pub struct MetricTranslator {
    path_prefix: String,
    label_maker: Arc<LabelMaker>,
    unit_parser: UnitParser,
    counter_tracker: Option<Arc<CounterTracker>>,
    runtime_metric_re: Regex,
}

impl MetricTranslator {
    /// Without a counter tracker, counter events are reported as a pair of
    /// `.delta` and `.total` gauges.
    pub fn new(
        path_prefix: impl Into<String>,
        label_maker: Arc<LabelMaker>,
        counter_tracker: Option<Arc<CounterTracker>>,
        runtime_metric_regex: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            path_prefix: path_prefix.into(),
            label_maker,
            unit_parser: UnitParser::new(),
            counter_tracker,
            runtime_metric_re: Regex::new(runtime_metric_regex)?,
        })
    }

    /// Runtime metrics are emitted by many origins under the same name. They
    /// keep the origin out of the metric name and carry it as a label so they
    /// aggregate across origins.
    fn is_runtime_metric(&self, envelope: &Envelope) -> bool {
        matches!(&envelope.event, Event::ValueMetric(metric) if self.runtime_metric_re.is_match(&metric.name))
    }

    fn prefix(&self, envelope: &Envelope, runtime: bool) -> String {
        let mut prefix = String::new();
        if !self.path_prefix.is_empty() {
            prefix.push_str(&self.path_prefix);
            prefix.push('/');
        }
        if !runtime && !envelope.origin.is_empty() {
            prefix.push_str(&envelope.origin);
            prefix.push('.');
        }
        prefix
    }

    /// Returns `None` for kinds that carry no metrics and for counter points
    /// that cannot be reported yet.
    pub fn translate(&self, envelope: &Envelope) -> Option<MetricEvent> {
        let runtime = self.is_runtime_metric(envelope);
        let labels = self.label_maker.metric_labels(envelope, runtime);
        let prefix = self.prefix(envelope, runtime);
        let event_time = envelope.event_time();

        let metrics = match &envelope.event {
            Event::ValueMetric(metric) => vec![Metric::gauge(
                format!("{prefix}{}", metric.name),
                metric.value,
                event_time,
                self.unit_parser.parse(&metric.unit),
            )],
            Event::ContainerMetric(container) => [
                ("diskBytesQuota", container.disk_bytes_quota as f64),
                ("cpuPercentage", container.cpu_percentage),
                ("diskBytes", container.disk_bytes as f64),
                ("memoryBytes", container.memory_bytes as f64),
                ("memoryBytesQuota", container.memory_bytes_quota as f64),
            ]
            .into_iter()
            .map(|(name, value)| Metric::gauge(format!("{prefix}{name}"), value, event_time, ""))
            .collect(),
            Event::CounterEvent(counter) => match &self.counter_tracker {
                None => vec![
                    Metric::gauge(
                        format!("{prefix}{}.delta", counter.name),
                        counter.delta as f64,
                        event_time,
                        "",
                    ),
                    Metric::gauge(
                        format!("{prefix}{}.total", counter.name),
                        counter.total as f64,
                        event_time,
                        "",
                    ),
                ],
                Some(tracker) => {
                    let name = format!("{prefix}{}", counter.name);
                    let (total, start_time) =
                        tracker.update(&series_key(&name, &labels), counter.total, event_time);
                    // the backend rejects empty intervals
                    if event_time <= start_time {
                        return None;
                    }
                    vec![Metric::cumulative(name, total, start_time, event_time)]
                }
            },
            Event::HttpStartStop(_) | Event::LogMessage(_) | Event::Error(_) => {
                warn!(kind = %envelope.kind(), "event type does not produce metrics");
                return None;
            }
        };

        Some(MetricEvent::new(labels, envelope.kind(), metrics))
    }
}

pub struct LogTranslator {
    label_maker: Arc<LabelMaker>,
    newline_token: Option<String>,
}

impl LogTranslator {
    pub fn new(label_maker: Arc<LabelMaker>, newline_token: Option<String>) -> Self {
        Self {
            label_maker,
            newline_token: newline_token.filter(|token| !token.is_empty()),
        }
    }

    /// Builds a log record whose payload is the envelope itself plus the
    /// fields the log backend indexes on.
    pub fn translate(&self, envelope: &Envelope) -> Log {
        let mut payload = match serde_json::to_value(envelope) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => Map::new(),
        };
        payload.insert(
            "eventType".to_string(),
            Value::String(envelope.kind().to_string()),
        );

        let mut severity = Severity::Default;
        match &envelope.event {
            Event::LogMessage(log) => {
                let message = self.parse_message(&log.message);
                if log.message_type == MessageType::Err {
                    severity = Severity::Error;
                }
                if let Some(Value::Object(fields)) = payload.get_mut("logMessage") {
                    fields.insert("message".to_string(), Value::String(message.clone()));
                }
                payload.insert("message".to_string(), Value::String(message));
            }
            Event::Error(error) => {
                payload.insert("message".to_string(), Value::String(error.message.clone()));
                severity = Severity::Error;
            }
            Event::HttpStartStop(http) => {
                if let Some(Value::Object(fields)) = payload.get_mut("httpStartStop") {
                    for (key, id) in [
                        ("requestId", http.request_id),
                        ("applicationId", http.application_id),
                    ] {
                        fields.insert(
                            key.to_string(),
                            Value::String(id.map(|id| id.to_string()).unwrap_or_default()),
                        );
                    }
                }
            }
            Event::ValueMetric(_) | Event::CounterEvent(_) | Event::ContainerMetric(_) => {}
        }

        let labels = self.label_maker.log_labels(envelope);
        if let Some(app) = labels.get("applicationPath") {
            payload.insert("serviceContext".to_string(), json!({ "service": app }));
        }

        Log {
            payload: Value::Object(payload),
            labels,
            severity,
        }
    }

    fn parse_message(&self, raw: &str) -> String {
        match &self.newline_token {
            Some(token) => raw.replace(token.as_str(), "\n"),
            None => raw.to_string(),
        }
    }
}
