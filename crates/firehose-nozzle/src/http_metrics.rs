// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-application HTTP counters derived from `HttpStartStop` envelopes.
//!
//! Counters live in the telemetry [`Registry`] under
//! `app-http.request_count{...}` and `app-http.response_code{...}`, one
//! series per label set.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::envelope::{Envelope, Event};
use crate::labels::{LabelMaker, Labels};
use crate::telemetry::Registry;

const HTTP_PREFIX: &str = "app-http";
const SERIES_LABELS: [&str; 4] = ["job", "index", "applicationPath", "instanceIndex"];

#[derive(Debug)]
pub struct HttpMetricsSink {
    label_maker: Arc<LabelMaker>,
    registry: Arc<Registry>,
}

impl HttpMetricsSink {
    pub fn new(label_maker: Arc<LabelMaker>, registry: Arc<Registry>) -> Self {
        Self {
            label_maker,
            registry,
        }
    }

    /// Counts one request. Only traffic to known applications is counted.
    pub fn receive(&self, envelope: &Envelope) {
        let Event::HttpStartStop(http) = &envelope.event else {
            return;
        };
        let labels = self.label_maker.metric_labels(envelope, false);
        if !labels.contains_key("applicationPath") {
            return;
        }

        let mut series: Vec<(&str, &str)> = SERIES_LABELS
            .iter()
            .map(|key| (*key, label_value(&labels, key)))
            .collect();
        self.registry
            .counter(&series_name("request_count", &series))
            .increment();

        let code = http.status_code.to_string();
        series.push(("code", &code));
        self.registry
            .counter(&series_name("response_code", &series))
            .increment();
    }
}

fn label_value<'a>(labels: &'a Labels, key: &str) -> &'a str {
    labels.get(key).map_or("", String::as_str)
}

fn series_name(name: &str, labels: &[(&str, &str)]) -> String {
    let mut series = format!("{HTTP_PREFIX}.{name}{{");
    for (i, (key, value)) in labels.iter().enumerate() {
        if i > 0 {
            series.push(',');
        }
        let _ = write!(series, "{key}={value:?}");
    }
    series.push('}');
    series
}
