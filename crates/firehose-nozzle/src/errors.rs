// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors detected while building the pipeline from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown event type {name:?}, valid types are: {valid}")]
    UnknownEventKind { name: String, valid: String },

    #[error("event type {0} does not produce metrics and cannot be sent to monitoring")]
    NotAMetricKind(String),

    #[error("at least one event type must be routed to logging or monitoring")]
    NoEventKinds,

    #[error("invalid event filter rules: {0}")]
    FilterRules(String),

    #[error("invalid event filter JSON: {0}")]
    FilterJson(#[from] serde_json::Error),

    #[error("invalid runtime metric regex: {0}")]
    RuntimeMetricRegex(#[from] regex::Error),

    #[error("could not load app metadata from {path}: {reason}")]
    AppMetadata { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned when registering a matcher with an event filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown filter match type {0:?}, valid types are: name, job")]
    UnknownMatchType(String),

    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A failed delivery to a metric sink. Never fatal to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("metric sink rejected {count} events: {reason}")]
    Rejected { count: usize, reason: String },

    #[error("metric sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported asynchronously by a producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    #[error("producer connection closed normally")]
    NormalClosure,

    #[error("producer connection closed by policy violation: {0}")]
    PolicyViolation(String),

    #[error("producer transport error: {0}")]
    Transport(String),

    #[error("producer failed: {0}")]
    Fatal(String),
}

impl ProducerError {
    /// Transport errors are recoverable by the producer itself, everything
    /// else ends the nozzle's run loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProducerError::Transport(_))
    }

    /// Name of the telemetry counter this error is accounted under.
    #[must_use]
    pub fn counter_name(&self) -> &'static str {
        match self {
            ProducerError::NormalClosure => "firehose.errors.close.normal_close",
            ProducerError::PolicyViolation(_) => "firehose.errors.close.policy_violation",
            ProducerError::Transport(_) | ProducerError::Fatal(_) => "firehose.errors.unknown",
        }
    }
}

/// Errors surfaced by the nozzle orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum NozzleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("nozzle is already running")]
    AlreadyRunning,

    #[error("nozzle is not running")]
    NotRunning,

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("producer event stream ended")]
    ProducerClosed,
}
