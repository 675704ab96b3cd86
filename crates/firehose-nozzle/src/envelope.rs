// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The firehose event model.
//!
//! An [`Envelope`] wraps exactly one [`Event`] together with the metadata of
//! the component that emitted it. Envelopes (de)serialize as flat JSON objects
//! where the event payload sits under its camel-cased kind, e.g.
//! `{"origin":"gorouter","job":"router","valueMetric":{"name":"latency",...}}`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Fieldless mirror of [`Event`], used for configuration and routing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
pub enum EventKind {
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Error,
    ContainerMetric,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::HttpStartStop,
        EventKind::LogMessage,
        EventKind::ValueMetric,
        EventKind::CounterEvent,
        EventKind::Error,
        EventKind::ContainerMetric,
    ];

    /// Whether events of this kind can be translated into metrics.
    #[must_use]
    pub fn produces_metrics(self) -> bool {
        matches!(
            self,
            EventKind::ValueMetric | EventKind::CounterEvent | EventKind::ContainerMetric
        )
    }

    fn valid_names() -> String {
        EventKind::ALL
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for EventKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| ConfigError::UnknownEventKind {
                name: s.to_string(),
                valid: EventKind::valid_names(),
            })
    }
}

/// Parses a list of event kind names, ignoring blank entries.
pub fn parse_event_kinds<S: AsRef<str>>(names: &[S]) -> Result<Vec<EventKind>, ConfigError> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        let kind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// 128-bit identifier as carried on the wire: two little-endian halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Uuid {
    pub low: u64,
    pub high: u64,
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.low.to_le_bytes());
        bytes[8..].copy_from_slice(&self.high.to_le_bytes());
        for (i, byte) in bytes.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub request_id: Option<Uuid>,
    pub peer_type: String,
    pub method: String,
    pub uri: String,
    pub remote_address: String,
    pub user_agent: String,
    pub status_code: i32,
    pub content_length: i64,
    pub application_id: Option<Uuid>,
    pub instance_index: Option<i32>,
    pub instance_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    #[display("OUT")]
    Out,
    #[display("ERR")]
    Err,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogMessage {
    pub message: String,
    pub message_type: MessageType,
    pub timestamp: i64,
    pub app_id: String,
    pub source_type: String,
    pub source_instance: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub source: String,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerMetric {
    pub application_id: String,
    pub instance_index: i32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_bytes_quota: u64,
    pub disk_bytes_quota: u64,
}

/// Kind-specific payload of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(ErrorEvent),
    ContainerMetric(ContainerMetric),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::HttpStartStop(_) => EventKind::HttpStartStop,
            Event::LogMessage(_) => EventKind::LogMessage,
            Event::ValueMetric(_) => EventKind::ValueMetric,
            Event::CounterEvent(_) => EventKind::CounterEvent,
            Event::Error(_) => EventKind::Error,
            Event::ContainerMetric(_) => EventKind::ContainerMetric,
        }
    }
}

/// One event observed on the firehose. Empty strings mean "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub ip: String,
    /// Nanoseconds since the unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            origin: String::new(),
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            timestamp: 0,
            tags: BTreeMap::new(),
            event,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// The envelope timestamp as a wall-clock instant.
    #[must_use]
    pub fn event_time(&self) -> SystemTime {
        let magnitude = Duration::from_nanos(self.timestamp.unsigned_abs());
        if self.timestamp >= 0 {
            UNIX_EPOCH + magnitude
        } else {
            UNIX_EPOCH.checked_sub(magnitude).unwrap_or(UNIX_EPOCH)
        }
    }

    /// Name of the metric carried by value metrics and counter events.
    #[must_use]
    pub fn metric_name(&self) -> Option<&str> {
        match &self.event {
            Event::ValueMetric(metric) => Some(metric.name.as_str()),
            Event::CounterEvent(counter) => Some(counter.name.as_str()),
            _ => None,
        }
    }

    /// Application the event belongs to, for kinds that carry one.
    #[must_use]
    pub fn application_id(&self) -> Option<String> {
        let id = match &self.event {
            Event::HttpStartStop(http) => http.application_id.map(|uuid| uuid.to_string()),
            Event::LogMessage(log) => Some(log.app_id.clone()),
            Event::ContainerMetric(container) => Some(container.application_id.clone()),
            _ => None,
        };
        id.filter(|id| !id.is_empty())
    }

    /// Application instance that emitted the event, for kinds that carry one.
    #[must_use]
    pub fn instance_index(&self) -> Option<String> {
        let index = match &self.event {
            Event::HttpStartStop(http) => Some(
                http.instance_index
                    .map_or_else(|| http.instance_id.clone(), |index| index.to_string()),
            ),
            Event::LogMessage(log) => Some(log.source_instance.clone()),
            Event::ContainerMetric(container) => Some(container.instance_index.to_string()),
            _ => None,
        };
        index.filter(|index| !index.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_metric(name: &str) -> Envelope {
        Envelope::new(Event::ValueMetric(ValueMetric {
            name: name.to_string(),
            value: 1.0,
            unit: "ms".to_string(),
        }))
    }

    #[test]
    fn test_event_kind_round_trips_through_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.to_string().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_kind_lists_valid_names() {
        let err = "Foo".parse::<EventKind>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"Foo\""));
        assert!(message.contains("ContainerMetric"));
        assert!(message.contains("HttpStartStop"));
    }

    #[test]
    fn test_parse_event_kinds_skips_blanks_and_duplicates() {
        let kinds = parse_event_kinds(&["LogMessage", " ", "", " Error ", "LogMessage"]).unwrap();
        assert_eq!(kinds, vec![EventKind::LogMessage, EventKind::Error]);
        assert!(parse_event_kinds(&["LogMessage", "Bogus"]).is_err());
        assert!(parse_event_kinds::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_produces_metrics() {
        let metric_kinds: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|kind| kind.produces_metrics())
            .collect();
        assert_eq!(
            metric_kinds,
            vec![
                EventKind::ValueMetric,
                EventKind::CounterEvent,
                EventKind::ContainerMetric
            ]
        );
    }

    #[test]
    fn test_uuid_display() {
        let uuid = Uuid {
            low: 0x7243_cc58_0bc1_7af4,
            high: 0x79d4_c3b2_020e_67a4,
        };
        assert_eq!(uuid.to_string(), "f47ac10b-58cc-4372-a467-0e02b2c3d479");
        assert_eq!(
            Uuid::default().to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_event_time() {
        let envelope = value_metric("foo").with_timestamp(1_500_000_000_123_456_789);
        assert_eq!(
            envelope.event_time(),
            UNIX_EPOCH + Duration::from_nanos(1_500_000_000_123_456_789)
        );
        let envelope = value_metric("foo").with_timestamp(-1_000);
        assert_eq!(envelope.event_time(), UNIX_EPOCH - Duration::from_nanos(1_000));
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(value_metric("latency").metric_name(), Some("latency"));
        let counter = Envelope::new(Event::CounterEvent(CounterEvent {
            name: "requests".to_string(),
            delta: 1,
            total: 2,
        }));
        assert_eq!(counter.metric_name(), Some("requests"));
        let log = Envelope::new(Event::LogMessage(LogMessage::default()));
        assert_eq!(log.metric_name(), None);
    }

    #[test]
    fn test_application_id_and_instance_index() {
        let http = Envelope::new(Event::HttpStartStop(HttpStartStop {
            application_id: Some(Uuid { low: 1, high: 2 }),
            instance_id: "abc".to_string(),
            ..Default::default()
        }));
        assert_eq!(
            http.application_id().as_deref(),
            Some("01000000-0000-0000-0200-000000000000")
        );
        assert_eq!(http.instance_index().as_deref(), Some("abc"));

        let container = Envelope::new(Event::ContainerMetric(ContainerMetric {
            application_id: "app-guid".to_string(),
            instance_index: 3,
            ..Default::default()
        }));
        assert_eq!(container.application_id().as_deref(), Some("app-guid"));
        assert_eq!(container.instance_index().as_deref(), Some("3"));

        let log = Envelope::new(Event::LogMessage(LogMessage::default()));
        assert_eq!(log.application_id(), None);
        assert_eq!(log.instance_index(), None);
        assert_eq!(value_metric("foo").application_id(), None);
    }

    #[test]
    fn test_envelope_json_shape() {
        let json = r#"{
            "origin": "gorouter",
            "job": "router",
            "timestamp": 42,
            "tags": {"zone": "z1"},
            "counterEvent": {"name": "total_requests", "delta": 2, "total": 10}
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind(), EventKind::CounterEvent);
        assert_eq!(envelope.origin, "gorouter");
        assert_eq!(envelope.timestamp, 42);
        assert_eq!(envelope.tags["zone"], "z1");
        assert_eq!(
            envelope.event,
            Event::CounterEvent(CounterEvent {
                name: "total_requests".to_string(),
                delta: 2,
                total: 10,
            })
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["counterEvent"]["total"], 10);
        assert_eq!(value["job"], "router");
    }

    #[test]
    fn test_log_message_type_serializes_uppercase() {
        let envelope = Envelope::new(Event::LogMessage(LogMessage {
            message: "boom".to_string(),
            message_type: MessageType::Err,
            ..Default::default()
        }));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["logMessage"]["messageType"], "ERR");
        assert_eq!(MessageType::Out.to_string(), "OUT");
    }
}
