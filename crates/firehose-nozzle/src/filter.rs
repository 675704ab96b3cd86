// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{FILTER_BLACKLISTED, FILTER_WHITELISTED};
use crate::envelope::{Envelope, EventKind};
use crate::errors::{ConfigError, FilterError};
use crate::telemetry::{Counter, Registry};

/// What part of an envelope a matcher looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// `origin.name` of value metrics and counter events.
    Name,
    /// The envelope's job, verbatim.
    Job,
}

impl FromStr for MatchKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(MatchKind::Name),
            "job" => Ok(MatchKind::Job),
            other => Err(FilterError::UnknownMatchType(other.to_string())),
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Name => f.write_str("name"),
            MatchKind::Job => f.write_str("job"),
        }
    }
}

#[derive(Debug)]
struct Matcher {
    kind: MatchKind,
    pattern: Regex,
}

impl Matcher {
    fn matches(&self, envelope: &Envelope) -> bool {
        match self.kind {
            MatchKind::Name => match envelope.metric_name() {
                Some(name) if !name.is_empty() && !envelope.origin.is_empty() => self
                    .pattern
                    .is_match(&format!("{}.{name}", envelope.origin)),
                _ => false,
            },
            MatchKind::Job => self.pattern.is_match(&envelope.job),
        }
    }
}

/// A set of regular expression matchers with OR semantics.
///
/// An empty filter matches nothing. Matchers can be added while other threads
/// are matching.
#[derive(Debug, Default)]
pub struct EventFilter {
    matchers: RwLock<Vec<Matcher>>,
}

impl EventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a matcher. Nothing is registered if `match_kind` is unknown
    /// or `pattern` does not compile.
    #[allow(clippy::expect_used)]
    pub fn add(&self, match_kind: &str, pattern: &str) -> Result<(), FilterError> {
        let kind = match_kind.parse()?;
        let pattern = Regex::new(pattern)?;
        self.matchers
            .write()
            .expect("lock poisoned")
            .push(Matcher { kind, pattern });
        Ok(())
    }

    #[allow(clippy::expect_used)]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.matchers
            .read()
            .expect("lock poisoned")
            .iter()
            .any(|matcher| matcher.matches(envelope))
    }

    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.matchers.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Matches `envelope` against an optional filter. No filter matches nothing.
pub fn matches_any(filter: Option<&EventFilter>, envelope: &Envelope) -> bool {
    filter.is_some_and(|filter| filter.matches(envelope))
}

/// Destination a filter rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSink {
    Monitoring,
    Logging,
    All,
}

/// One user-supplied filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilterRule {
    #[serde(rename = "type")]
    pub match_kind: String,
    pub sink: RuleSink,
    pub regexp: String,
}

impl fmt::Display for EventFilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{type: {:?}, sink: {:?}, regexp: {:?}}}",
            self.match_kind, self.sink, self.regexp
        )
    }
}

/// Deny and allow rules, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFilterRules {
    #[serde(default)]
    pub blacklist: Vec<EventFilterRule>,
    #[serde(default)]
    pub whitelist: Vec<EventFilterRule>,
}

/// Compiled deny/allow filters for both destinations. A filter is `None`
/// when no rule targets it.
#[derive(Debug, Default)]
pub struct FilterSet {
    pub logging_deny: Option<Arc<EventFilter>>,
    pub logging_allow: Option<Arc<EventFilter>>,
    pub monitoring_deny: Option<Arc<EventFilter>>,
    pub monitoring_allow: Option<Arc<EventFilter>>,
}

impl FilterSet {
    /// Compiles every rule, reporting all invalid rules at once.
    pub fn from_rules(rules: &EventFilterRules) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        let (logging_deny, monitoring_deny) = compile(&rules.blacklist, &mut errors);
        let (logging_allow, monitoring_allow) = compile(&rules.whitelist, &mut errors);
        if !errors.is_empty() {
            return Err(ConfigError::FilterRules(errors.join("; ")));
        }
        Ok(Self {
            logging_deny,
            logging_allow,
            monitoring_deny,
            monitoring_allow,
        })
    }
}

fn compile(
    rules: &[EventFilterRule],
    errors: &mut Vec<String>,
) -> (Option<Arc<EventFilter>>, Option<Arc<EventFilter>>) {
    let mut logging: Option<Arc<EventFilter>> = None;
    let mut monitoring: Option<Arc<EventFilter>> = None;
    for rule in rules {
        if rule.regexp.is_empty() {
            errors.push(format!("rule {rule} has an empty regexp"));
            continue;
        }
        let targets = match rule.sink {
            RuleSink::Logging => vec![&mut logging],
            RuleSink::Monitoring => vec![&mut monitoring],
            RuleSink::All => vec![&mut logging, &mut monitoring],
        };
        for target in targets {
            let filter = target.get_or_insert_with(|| Arc::new(EventFilter::new()));
            if let Err(e) = filter.add(&rule.match_kind, &rule.regexp) {
                errors.push(format!("rule {rule}: {e}"));
                break;
            }
        }
    }
    (logging, monitoring)
}

/// Admits envelopes of enabled kinds that are not denied. An envelope that
/// matches the deny filter is still admitted when it matches the allow
/// filter.
pub struct FilterSink {
    enabled: HashSet<EventKind>,
    deny: Option<Arc<EventFilter>>,
    allow: Option<Arc<EventFilter>>,
    blacklisted: Counter,
    whitelisted: Counter,
}

impl FilterSink {
    pub fn new(
        enabled: &[EventKind],
        deny: Option<Arc<EventFilter>>,
        allow: Option<Arc<EventFilter>>,
        registry: &Registry,
    ) -> Self {
        Self {
            enabled: enabled.iter().copied().collect(),
            deny,
            allow,
            blacklisted: registry.counter(FILTER_BLACKLISTED),
            whitelisted: registry.counter(FILTER_WHITELISTED),
        }
    }

    #[must_use]
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn admits(&self, envelope: &Envelope) -> bool {
        self.is_enabled(envelope.kind()) && !self.is_denied(envelope)
    }

    fn is_denied(&self, envelope: &Envelope) -> bool {
        if !matches_any(self.deny.as_deref(), envelope) {
            return false;
        }
        if matches_any(self.allow.as_deref(), envelope) {
            self.whitelisted.increment();
            return false;
        }
        debug!(kind = %envelope.kind(), origin = %envelope.origin, "envelope denied by filter");
        self.blacklisted.increment();
        true
    }
}

impl fmt::Debug for FilterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSink")
            .field("enabled", &self.enabled)
            .field("deny", &self.deny.as_ref().map(|filter| filter.len()))
            .field("allow", &self.allow.as_ref().map(|filter| filter.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CounterEvent, Event, LogMessage, ValueMetric};

    fn value_metric(origin: &str, name: &str) -> Envelope {
        Envelope::new(Event::ValueMetric(ValueMetric {
            name: name.to_string(),
            ..Default::default()
        }))
        .with_origin(origin)
    }

    fn log_from_job(job: &str) -> Envelope {
        Envelope::new(Event::LogMessage(LogMessage::default())).with_job(job)
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = EventFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.matches(&value_metric("gorouter", "total_requests")));
        assert!(!matches_any(None, &value_metric("gorouter", "total_requests")));
    }

    #[test]
    fn test_name_filters() {
        let filter = EventFilter::new();
        filter.add("name", r"[^.]+\.total_requests").unwrap();
        filter.add("name", r"gorouter\..*").unwrap();
        assert_eq!(filter.len(), 2);

        let cases = [
            ("", "", false),
            ("", "total_requests", false),
            ("gorouter", "", false),
            ("foo", "bar", false),
            ("foo", "total_requests", true),
            ("gorouter", "bar", true),
            ("gorouter", "total_requests", true),
        ];
        for (origin, name, expected) in cases {
            assert_eq!(
                filter.matches(&value_metric(origin, name)),
                expected,
                "origin {origin:?} name {name:?}"
            );
        }
    }

    #[test]
    fn test_name_filters_apply_to_counters_only_among_other_kinds() {
        let filter = EventFilter::new();
        filter.add("name", r"gorouter\..*").unwrap();

        let counter = Envelope::new(Event::CounterEvent(CounterEvent {
            name: "total_requests".to_string(),
            ..Default::default()
        }))
        .with_origin("gorouter");
        assert!(filter.matches(&counter));

        let log = Envelope::new(Event::LogMessage(LogMessage::default())).with_origin("gorouter");
        assert!(!filter.matches(&log));
    }

    #[test]
    fn test_job_filters() {
        let filter = EventFilter::new();
        filter.add("job", r"etc[dD](_server)?").unwrap();
        filter.add("job", r"^router$").unwrap();

        let cases = [
            ("", false),
            ("foo", false),
            ("gorouter", false),
            ("router", true),
            ("etc", false),
            ("etcd", true),
            ("etcD_server", true),
        ];
        for (job, expected) in cases {
            assert_eq!(filter.matches(&log_from_job(job)), expected, "job {job:?}");
        }
    }

    #[test]
    fn test_invalid_additions_register_nothing() {
        let filter = EventFilter::new();
        assert!(matches!(
            filter.add("foo", "bar"),
            Err(FilterError::UnknownMatchType(kind)) if kind == "foo"
        ));
        assert!(matches!(
            filter.add("job", "$))]([{{{{(((^^^"),
            Err(FilterError::Pattern(_))
        ));
        assert_eq!(filter.len(), 0);
    }

    #[test]
    fn test_concurrent_add_and_match() {
        let filter = Arc::new(EventFilter::new());
        let envelope = log_from_job("router");
        std::thread::scope(|scope| {
            for i in 0..4 {
                let filter = Arc::clone(&filter);
                scope.spawn(move || {
                    for j in 0..25 {
                        filter.add("job", &format!("^job-{i}-{j}$")).unwrap();
                    }
                });
            }
            for _ in 0..4 {
                let filter = Arc::clone(&filter);
                let envelope = envelope.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        assert!(!filter.matches(&envelope));
                    }
                });
            }
        });
        assert_eq!(filter.len(), 100);
    }

    #[test]
    fn test_filter_set_from_rules() {
        let rules: EventFilterRules = serde_json::from_str(
            r#"{
                "blacklist": [
                    {"type": "name", "sink": "all", "regexp": "gorouter\\..*"},
                    {"type": "job", "sink": "logging", "regexp": "^diego_cell$"}
                ],
                "whitelist": [
                    {"type": "name", "sink": "monitoring", "regexp": "gorouter\\.latency"}
                ]
            }"#,
        )
        .unwrap();
        let filters = FilterSet::from_rules(&rules).unwrap();
        assert_eq!(filters.logging_deny.as_ref().map(|f| f.len()), Some(2));
        assert_eq!(filters.monitoring_deny.as_ref().map(|f| f.len()), Some(1));
        assert_eq!(filters.monitoring_allow.as_ref().map(|f| f.len()), Some(1));
        assert!(filters.logging_allow.is_none());
    }

    #[test]
    fn test_filter_set_reports_every_bad_rule() {
        let rules = EventFilterRules {
            blacklist: vec![
                EventFilterRule {
                    match_kind: "origin".to_string(),
                    sink: RuleSink::Logging,
                    regexp: "x".to_string(),
                },
                EventFilterRule {
                    match_kind: "job".to_string(),
                    sink: RuleSink::All,
                    regexp: String::new(),
                },
            ],
            whitelist: vec![EventFilterRule {
                match_kind: "job".to_string(),
                sink: RuleSink::Monitoring,
                regexp: "(".to_string(),
            }],
        };
        let err = FilterSet::from_rules(&rules).unwrap_err().to_string();
        assert!(err.contains("unknown filter match type \"origin\""), "{err}");
        assert!(err.contains("empty regexp"), "{err}");
        assert!(err.contains("invalid filter pattern"), "{err}");
    }

    #[test]
    fn test_filter_sink_deny_and_allow() {
        let registry = Registry::new();
        let deny = Arc::new(EventFilter::new());
        deny.add("name", r"gorouter\..*").unwrap();
        let allow = Arc::new(EventFilter::new());
        allow.add("name", r"gorouter\.latency").unwrap();

        let sink = FilterSink::new(
            &[EventKind::ValueMetric],
            Some(deny),
            Some(allow),
            &registry,
        );

        assert!(sink.admits(&value_metric("bbs", "latency")));
        assert!(!sink.admits(&value_metric("gorouter", "total_requests")));
        assert!(sink.admits(&value_metric("gorouter", "latency")));
        assert!(!sink.admits(&log_from_job("router")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[FILTER_BLACKLISTED], 1);
        assert_eq!(snapshot[FILTER_WHITELISTED], 1);
    }

    #[test]
    fn test_filter_sink_without_filters_admits_enabled_kinds() {
        let registry = Registry::new();
        let sink = FilterSink::new(&[EventKind::LogMessage], None, None, &registry);
        assert!(sink.admits(&log_from_job("anything")));
        assert!(!sink.admits(&value_metric("gorouter", "latency")));
        assert!(sink.is_enabled(EventKind::LogMessage));
    }
}
