// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recording sinks and an in-memory producer shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::envelope::Envelope;
use crate::errors::{ProducerError, SinkError};
use crate::metric::MetricEvent;
use crate::sink::{Log, LogSink, MetricSink, Producer};

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
    failure: Option<String>,
}

impl RecordingMetricSink {
    pub fn failing(reason: &str) -> Self {
        Self {
            calls: Mutex::default(),
            failure: Some(reason.to_string()),
        }
    }

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
        match &self.failure {
            Some(reason) => Err(SinkError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Metric sink whose calls block until the test releases them.
#[derive(Debug, Default)]
pub struct GatedMetricSink {
    pub entered: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl GatedMetricSink {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSink for GatedMetricSink {
    async fn post_metric_events(&self, _events: Vec<MetricEvent>) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Producer backed by channels the test writes to.
pub struct ChannelProducer {
    channels: Option<(mpsc::Receiver<Envelope>, mpsc::Receiver<ProducerError>)>,
}

impl ChannelProducer {
    pub fn new() -> (Self, mpsc::Sender<Envelope>, mpsc::Sender<ProducerError>) {
        let (events_tx, events_rx) = mpsc::channel(128);
        let (errors_tx, errors_rx) = mpsc::channel(8);
        (
            Self {
                channels: Some((events_rx, errors_rx)),
            },
            events_tx,
            errors_tx,
        )
    }
}

impl Producer for ChannelProducer {
    fn connect(&mut self) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ProducerError>) {
        self.channels.take().unwrap_or_else(|| {
            let (_, events_rx) = mpsc::channel(1);
            let (_, errors_rx) = mpsc::channel(1);
            (events_rx, errors_rx)
        })
    }
}
