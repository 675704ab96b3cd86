// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::envelope::EventKind;
use crate::labels::Labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MetricKind {
    #[default]
    Gauge,
    Cumulative,
}

/// A single point of a time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub int_value: i64,
    #[serde(serialize_with = "serialize_nanos")]
    pub event_time: SystemTime,
    /// Start of the interval a cumulative point covers.
    #[serde(skip)]
    pub start_time: Option<SystemTime>,
    pub unit: String,
}

impl Metric {
    pub fn gauge(
        name: impl Into<String>,
        value: f64,
        event_time: SystemTime,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Gauge,
            value,
            int_value: 0,
            event_time,
            start_time: None,
            unit: unit.into(),
        }
    }

    pub fn cumulative(
        name: impl Into<String>,
        total: i64,
        start_time: SystemTime,
        event_time: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Cumulative,
            value: 0.0,
            int_value: total,
            event_time,
            start_time: Some(start_time),
            unit: String::new(),
        }
    }
}

/// Points that share one label set and event kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    #[serde(skip)]
    pub labels: Labels,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub metrics: Vec<Metric>,
    /// Whether a router that logs this kind may log the event. Cleared for
    /// events the logging filters reject.
    #[serde(skip)]
    pub loggable: bool,
}

impl MetricEvent {
    pub fn new(labels: Labels, kind: EventKind, metrics: Vec<Metric>) -> Self {
        Self {
            labels,
            kind,
            metrics,
            loggable: true,
        }
    }

    #[must_use]
    pub fn with_loggable(mut self, loggable: bool) -> Self {
        self.loggable = loggable;
        self
    }

    /// Identity of the series this event belongs to: its metric names plus
    /// the flattened label set. Independent of label insertion order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let names = self
            .metrics
            .iter()
            .map(|metric| metric.name.as_str())
            .collect::<Vec<_>>()
            .join("|");
        series_key(&names, &self.labels)
    }

    /// Event time of the first point, used to order events of one series.
    #[must_use]
    pub fn primary_event_time(&self) -> Option<SystemTime> {
        self.metrics.first().map(|metric| metric.event_time)
    }
}

/// Key identifying the series `name` with `labels`.
pub fn series_key(name: &str, labels: &Labels) -> String {
    format!("{name},{}", flatten(labels))
}

/// Deterministic string form of a label set: keys sorted, values quoted.
pub fn flatten(labels: &Labels) -> String {
    let mut pairs: Vec<_> = labels.iter().collect();
    pairs.sort_unstable();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key:?}={value:?}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn serialize_nanos<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let nanos = time
        .duration_since(UNIX_EPOCH)
        .map(|since| u64::try_from(since.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    serializer.serialize_u64(nanos)
}
