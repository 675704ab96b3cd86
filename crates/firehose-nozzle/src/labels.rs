// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt::{self, Debug, Write as _};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::Envelope;
use crate::errors::ConfigError;

/// Label key to label value. Keys are unique and values never empty.
pub type Labels = HashMap<String, String>;

/// Application metadata resolved from an application id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub app_name: String,
    pub space_name: String,
    pub space_guid: String,
    pub org_name: String,
    pub org_guid: String,
}

/// Resolves application ids to their metadata. Unknown ids resolve to an
/// empty [`AppInfo`]. Implementations are read from many ingestion paths at
/// once and must not block indefinitely.
pub trait AppInfoRepository: Send + Sync {
    fn get_app_info(&self, app_id: &str) -> AppInfo;
}

/// Repository that knows no applications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAppInfoRepository;

impl AppInfoRepository for NullAppInfoRepository {
    fn get_app_info(&self, _app_id: &str) -> AppInfo {
        AppInfo::default()
    }
}

/// Repository backed by a fixed table of application id to metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct StaticAppInfoRepository {
    apps: HashMap<String, AppInfo>,
}

impl StaticAppInfoRepository {
    pub fn new(apps: HashMap<String, AppInfo>) -> Self {
        Self { apps }
    }

    /// Reads a JSON object keyed by application id.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let err = |reason: String| ConfigError::AppMetadata {
            path: path.display().to_string(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let repository: Self = serde_json::from_str(&json).map_err(|e| err(e.to_string()))?;
        debug!(apps = repository.len(), "loaded app metadata");
        Ok(repository)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl AppInfoRepository for StaticAppInfoRepository {
    fn get_app_info(&self, app_id: &str) -> AppInfo {
        self.apps.get(app_id).cloned().unwrap_or_default()
    }
}

/// Builds metric and log labels for envelopes.
pub struct LabelMaker {
    app_info: Arc<dyn AppInfoRepository>,
    foundation: String,
}

impl LabelMaker {
    pub fn new(app_info: Arc<dyn AppInfoRepository>, foundation: impl Into<String>) -> Self {
        Self {
            app_info,
            foundation: foundation.into(),
        }
    }

    /// Labels attached to every metric derived from `envelope`.
    ///
    /// Application metadata is collapsed into a single `applicationPath`
    /// (`/org/space/app`) so metrics stay within the backend's label budget.
    /// The origin is normally part of the metric name; runtime metrics share
    /// names across origins and carry it as a label instead.
    pub fn metric_labels(&self, envelope: &Envelope, runtime: bool) -> Labels {
        let mut labels = Labels::new();
        set_if_not_empty(&mut labels, "foundation", &self.foundation);
        set_if_not_empty(&mut labels, "job", &envelope.job);
        set_if_not_empty(&mut labels, "index", &envelope.index);
        if let Some(path) = self.application_path(envelope) {
            labels.insert("applicationPath".to_string(), path);
        }
        if let Some(instance) = envelope.instance_index() {
            labels.insert("instanceIndex".to_string(), instance);
        }
        set_if_not_empty(&mut labels, "tags", &flatten_tags(envelope));
        if runtime {
            set_if_not_empty(&mut labels, "origin", &envelope.origin);
        }
        labels
    }

    /// Metric labels plus the origin and event type, so logs of one kind
    /// can be queried together.
    pub fn log_labels(&self, envelope: &Envelope) -> Labels {
        let mut labels = self.metric_labels(envelope, false);
        set_if_not_empty(&mut labels, "origin", &envelope.origin);
        labels.insert("eventType".to_string(), envelope.kind().to_string());
        labels
    }

    fn application_path(&self, envelope: &Envelope) -> Option<String> {
        let app_id = envelope.application_id()?;
        let info = self.app_info.get_app_info(&app_id);
        if info.app_name.is_empty() {
            return None;
        }

        let mut path = String::new();
        for (key, value) in [
            ("org", &info.org_name),
            ("space", &info.space_name),
            ("application", &info.app_name),
        ] {
            path.push('/');
            if value.is_empty() {
                let _ = write!(path, "unknown_{key}");
            } else {
                path.push_str(value);
            }
        }
        Some(path)
    }
}

impl Debug for LabelMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelMaker")
            .field("foundation", &self.foundation)
            .finish_non_exhaustive()
    }
}

fn set_if_not_empty(labels: &mut Labels, key: &str, value: &str) {
    if !value.is_empty() {
        labels.insert(key.to_string(), value.to_string());
    }
}

// Tags are serialized into one label because emitters disagree on tag sets
// for the same metric, and label keys are part of the metric descriptor.
fn flatten_tags(envelope: &Envelope) -> String {
    envelope
        .tags
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
