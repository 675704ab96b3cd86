// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contracts of the collaborators the nozzle feeds from and writes to.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::errors::{ProducerError, SinkError};
use crate::labels::Labels;
use crate::metric::MetricEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Severity {
    #[default]
    Default,
    Error,
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub payload: serde_json::Value,
    pub labels: Labels,
    pub severity: Severity,
}

/// Destination for logs. Posting is fire-and-forget; batching and retries
/// belong to the implementation.
pub trait LogSink: Send + Sync {
    fn post_log(&self, log: Log);
}

/// Destination for metrics. May be called with any number of events; a
/// failure is reported back but never stops the pipeline.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn post_metric_events(&self, events: Vec<MetricEvent>) -> Result<(), SinkError>;
}

/// Source of envelopes. `connect` hands out the event stream and a stream of
/// asynchronous errors; reconnecting is up to the producer.
pub trait Producer: Send {
    fn connect(&mut self) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ProducerError>);
}
