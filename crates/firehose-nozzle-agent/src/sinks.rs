// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sinks that write logs and metric events as JSON lines.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use firehose_nozzle::errors::SinkError;
use firehose_nozzle::metric::MetricEvent;
use firehose_nozzle::sink::{Log, LogSink, MetricSink};
use serde_json::{json, Value};
use tracing::warn;

/// One writer shared by both sinks so lines never interleave.
pub struct JsonLinesWriter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Arc<Self> {
        Arc::new(Self {
            out: Mutex::new(out),
        })
    }

    fn write_line(&self, line: &Value) -> std::io::Result<()> {
        #[allow(clippy::expect_used)]
        let mut out = self.out.lock().expect("lock poisoned");
        serde_json::to_writer(&mut *out, line)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

pub struct JsonLogSink<W> {
    writer: Arc<JsonLinesWriter<W>>,
}

impl<W> JsonLogSink<W> {
    pub fn new(writer: Arc<JsonLinesWriter<W>>) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> LogSink for JsonLogSink<W> {
    fn post_log(&self, log: Log) {
        let line = json!({
            "log": {
                "severity": log.severity,
                "labels": log.labels,
                "payload": log.payload,
            }
        });
        if let Err(e) = self.writer.write_line(&line) {
            warn!("failed to write log: {e}");
        }
    }
}

pub struct JsonMetricSink<W> {
    writer: Arc<JsonLinesWriter<W>>,
}

impl<W> JsonMetricSink<W> {
    pub fn new(writer: Arc<JsonLinesWriter<W>>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: Write + Send> MetricSink for JsonMetricSink<W> {
    async fn post_metric_events(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        let count = events.len();
        let events: Vec<Value> = events
            .iter()
            .map(|event| {
                json!({
                    "labels": event.labels,
                    "event": event,
                })
            })
            .collect();
        self.writer
            .write_line(&json!({ "metrics": events }))
            .map_err(|e| SinkError::Rejected {
                count,
                reason: e.to_string(),
            })
    }
}
