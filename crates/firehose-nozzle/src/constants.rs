// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Interval at which `Nozzle::stop` checks whether the metrics buffer drained.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on how long `Nozzle::stop` waits for the buffer to drain.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Upper bound on the counter tracker's expiry sweep period.
pub const MAX_EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// Smallest period any background ticker is allowed to run at.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Capacity of the buffer's flush error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_LOGGING_EVENTS: &str = "LogMessage,Error";
pub const DEFAULT_MONITORING_EVENTS: &str = "ValueMetric,CounterEvent,ContainerMetric";
pub const DEFAULT_METRICS_BUFFER_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_METRIC_PATH_PREFIX: &str = "firehose";
pub const DEFAULT_FOUNDATION_NAME: &str = "cf";
pub const DEFAULT_RUNTIME_METRIC_REGEX: &str = r"^(numCPUS|numGoRoutines|memoryStats\..*)$";
pub const DEFAULT_COUNTER_TRACKER_TTL: Duration = Duration::from_secs(130);
pub const DEFAULT_HEARTBEAT_RATE: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const EVENTS_RECEIVED: &str = "nozzle.events";
pub const EVENTS_SAMPLED: &str = "metrics.firehose_events.sampled";
pub const COUNTERS_EXPIRED: &str = "metrics.counters.expired";
pub const FILTER_BLACKLISTED: &str = "filter_sink.blacklisted_events";
pub const FILTER_WHITELISTED: &str = "filter_sink.whitelisted_events";
