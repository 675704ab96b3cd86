// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use firehose_nozzle::envelope::Envelope;
use firehose_nozzle::errors::{ProducerError, SinkError};
use firehose_nozzle::labels::{AppInfo, AppInfoRepository};
use firehose_nozzle::metric::MetricEvent;
use firehose_nozzle::sink::{Log, LogSink, MetricSink, Producer};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

#[derive(Debug, Default)]
pub struct RecordingLogSink {
    logs: Mutex<Vec<Log>>,
}

impl RecordingLogSink {
    pub fn logs(&self) -> Vec<Log> {
        self.logs.lock().unwrap().clone()
    }
}

impl LogSink for RecordingLogSink {
    fn post_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }
}

#[derive(Debug, Default)]
pub struct RecordingMetricSink {
    calls: Mutex<Vec<Vec<MetricEvent>>>,
}

impl RecordingMetricSink {
    pub fn calls(&self) -> Vec<Vec<MetricEvent>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.calls().into_iter().flatten().collect()
    }
}

#[async_trait]
impl MetricSink for RecordingMetricSink {
    async fn post_metric_events(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(events);
        Ok(())
    }
}

/// Resolves every application id to the same app.
pub struct FixedAppInfo(pub AppInfo);

impl AppInfoRepository for FixedAppInfo {
    fn get_app_info(&self, _app_id: &str) -> AppInfo {
        self.0.clone()
    }
}

pub struct ChannelProducer {
    events: Option<mpsc::Receiver<Envelope>>,
    errors: Option<mpsc::Receiver<ProducerError>>,
}

impl ChannelProducer {
    pub fn new() -> (Self, mpsc::Sender<Envelope>, mpsc::Sender<ProducerError>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (errors_tx, errors_rx) = mpsc::channel(16);
        (
            Self {
                events: Some(events_rx),
                errors: Some(errors_rx),
            },
            events_tx,
            errors_tx,
        )
    }
}

impl Producer for ChannelProducer {
    fn connect(&mut self) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ProducerError>) {
        (
            self.events.take().expect("producer connected twice"),
            self.errors.take().expect("producer connected twice"),
        )
    }
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
