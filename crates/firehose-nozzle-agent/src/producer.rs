// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Envelope source that reads one JSON envelope per line.

use firehose_nozzle::envelope::Envelope;
use firehose_nozzle::errors::ProducerError;
use firehose_nozzle::sink::Producer;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Malformed lines are reported as non-fatal errors and skipped. A read
/// failure is fatal. End of input closes the event stream.
pub struct JsonLinesProducer<R> {
    input: Option<R>,
}

impl<R> JsonLinesProducer<R> {
    pub fn new(input: R) -> Self {
        Self { input: Some(input) }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> Producer for JsonLinesProducer<R> {
    fn connect(&mut self) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ProducerError>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        if let Some(input) = self.input.take() {
            tokio::spawn(read_lines(input, events_tx, errors_tx));
        }
        (events_rx, errors_rx)
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    input: R,
    events: mpsc::Sender<Envelope>,
    errors: mpsc::Sender<ProducerError>,
) {
    let mut lines = BufReader::new(input).lines();
    let mut line_number = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(lines = line_number, "end of input");
                return;
            }
            Err(e) => {
                let _ = errors
                    .send(ProducerError::Fatal(format!("failed to read input: {e}")))
                    .await;
                return;
            }
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                if events.send(envelope).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let err = ProducerError::Transport(format!("line {line_number}: {e}"));
                if errors.send(err).await.is_err() {
                    return;
                }
            }
        }
    }
}
