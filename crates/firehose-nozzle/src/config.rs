// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::constants::{
    DEFAULT_COUNTER_TRACKER_TTL, DEFAULT_FOUNDATION_NAME, DEFAULT_HEARTBEAT_RATE,
    DEFAULT_LOGGING_EVENTS, DEFAULT_LOG_LEVEL, DEFAULT_METRICS_BUFFER_DURATION,
    DEFAULT_METRIC_PATH_PREFIX, DEFAULT_MONITORING_EVENTS, DEFAULT_RUNTIME_METRIC_REGEX,
};
use crate::envelope::{parse_event_kinds, EventKind};
use crate::errors::ConfigError;
use crate::filter::{EventFilterRules, FilterSet};
use crate::labels::{AppInfoRepository, NullAppInfoRepository, StaticAppInfoRepository};

/// Configuration of a nozzle, supplied as plain values at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NozzleConfig {
    /// Event kinds sent to the log sink.
    pub logging_events: Vec<String>,
    /// Event kinds sent to the metric sink. Each must produce metrics.
    pub monitoring_events: Vec<String>,
    pub event_filters: EventFilterRules,
    /// Period of the deduplicating metrics buffer.
    pub metrics_buffer_duration: Duration,
    pub metric_path_prefix: String,
    pub foundation_name: String,
    pub runtime_metric_regex: String,
    /// Report counter events as cumulative metrics rather than gauges.
    pub enable_cumulative_counters: bool,
    pub counter_tracker_ttl: Duration,
    /// Count requests and response codes per application.
    pub enable_app_http_metrics: bool,
    /// Resolve application ids to org, space and app names.
    pub resolve_app_metadata: bool,
    /// JSON object of application id to app metadata, read when
    /// `resolve_app_metadata` is set.
    pub app_metadata_file: Option<PathBuf>,
    /// Token replaced by a newline in log messages.
    pub newline_token: Option<String>,
    pub heartbeat_rate: Duration,
    pub log_level: String,
}

impl Default for NozzleConfig {
    fn default() -> Self {
        Self {
            logging_events: split_list(DEFAULT_LOGGING_EVENTS),
            monitoring_events: split_list(DEFAULT_MONITORING_EVENTS),
            event_filters: EventFilterRules::default(),
            metrics_buffer_duration: DEFAULT_METRICS_BUFFER_DURATION,
            metric_path_prefix: DEFAULT_METRIC_PATH_PREFIX.to_string(),
            foundation_name: DEFAULT_FOUNDATION_NAME.to_string(),
            runtime_metric_regex: DEFAULT_RUNTIME_METRIC_REGEX.to_string(),
            enable_cumulative_counters: true,
            counter_tracker_ttl: DEFAULT_COUNTER_TRACKER_TTL,
            enable_app_http_metrics: false,
            resolve_app_metadata: false,
            app_metadata_file: None,
            newline_token: None,
            heartbeat_rate: DEFAULT_HEARTBEAT_RATE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl NozzleConfig {
    /// Create configuration from `NOZZLE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let logging_events = lookup("NOZZLE_EVENTS_TO_LOGGING")
            .map(|val| split_list(&val))
            .unwrap_or(defaults.logging_events);
        let monitoring_events = lookup("NOZZLE_EVENTS_TO_MONITORING")
            .map(|val| split_list(&val))
            .unwrap_or(defaults.monitoring_events);
        let event_filters = match lookup("NOZZLE_EVENT_FILTER_JSON") {
            Some(json) if !json.trim().is_empty() => serde_json::from_str(&json)?,
            _ => defaults.event_filters,
        };
        let metrics_buffer_duration = parse_seconds(
            &lookup,
            "NOZZLE_METRICS_BUFFER_DURATION",
            defaults.metrics_buffer_duration,
        )?;
        let metric_path_prefix = lookup("NOZZLE_METRIC_PATH_PREFIX")
            .unwrap_or(defaults.metric_path_prefix);
        let foundation_name =
            lookup("NOZZLE_FOUNDATION_NAME").unwrap_or(defaults.foundation_name);
        let runtime_metric_regex =
            lookup("NOZZLE_RUNTIME_METRIC_REGEX").unwrap_or(defaults.runtime_metric_regex);
        let enable_cumulative_counters = lookup("NOZZLE_ENABLE_CUMULATIVE_COUNTERS")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.enable_cumulative_counters);
        let counter_tracker_ttl = parse_seconds(
            &lookup,
            "NOZZLE_COUNTER_TRACKER_TTL",
            defaults.counter_tracker_ttl,
        )?;
        let enable_app_http_metrics = lookup("NOZZLE_ENABLE_APP_HTTP_METRICS")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(defaults.enable_app_http_metrics);
        let resolve_app_metadata = lookup("NOZZLE_RESOLVE_APP_METADATA")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(defaults.resolve_app_metadata);
        let app_metadata_file = lookup("NOZZLE_APP_METADATA_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        let newline_token = lookup("NOZZLE_NEWLINE_TOKEN").filter(|token| !token.is_empty());
        let heartbeat_rate =
            parse_seconds(&lookup, "NOZZLE_HEARTBEAT_RATE", defaults.heartbeat_rate)?;
        let log_level = lookup("NOZZLE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            logging_events,
            monitoring_events,
            event_filters,
            metrics_buffer_duration,
            metric_path_prefix,
            foundation_name,
            runtime_metric_regex,
            enable_cumulative_counters,
            counter_tracker_ttl,
            enable_app_http_metrics,
            resolve_app_metadata,
            app_metadata_file,
            newline_token,
            heartbeat_rate,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let logging = self.logging_kinds()?;
        let monitoring = self.monitoring_kinds()?;
        if logging.is_empty() && monitoring.is_empty() {
            return Err(ConfigError::NoEventKinds);
        }

        FilterSet::from_rules(&self.event_filters)?;
        Regex::new(&self.runtime_metric_regex)?;

        for (name, value) in [
            ("metrics buffer duration", self.metrics_buffer_duration),
            ("counter tracker TTL", self.counter_tracker_ttl),
            ("heartbeat rate", self.heartbeat_rate),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.resolve_app_metadata && self.app_metadata_file.is_none() {
            return Err(ConfigError::Invalid(
                "resolving app metadata requires an app metadata file".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Builds the app metadata source. Without `resolve_app_metadata`
    /// no application is known.
    pub fn app_info_repository(&self) -> Result<Arc<dyn AppInfoRepository>, ConfigError> {
        match (&self.app_metadata_file, self.resolve_app_metadata) {
            (Some(path), true) => Ok(Arc::new(StaticAppInfoRepository::load(path)?)),
            _ => Ok(Arc::new(NullAppInfoRepository)),
        }
    }

    pub fn logging_kinds(&self) -> Result<Vec<EventKind>, ConfigError> {
        parse_event_kinds(&self.logging_events)
    }

    /// Monitoring kinds, rejecting kinds that carry no metrics.
    pub fn monitoring_kinds(&self) -> Result<Vec<EventKind>, ConfigError> {
        let kinds = parse_event_kinds(&self.monitoring_events)?;
        if let Some(kind) = kinds.iter().find(|kind| !kind.produces_metrics()) {
            return Err(ConfigError::NotAMetricKind(kind.to_string()));
        }
        Ok(kinds)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn parse_seconds<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
            ConfigError::Invalid(format!(
                "{key} must be a whole number of seconds, got {raw:?}"
            ))
        }),
    }
}
