use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{StoreError, TrackerError},
    storage::{
        documents::{read_document, write_document, SETTINGS_KEY},
        kv::KeyValueStore,
    },
};

/// User settings, stored as a singleton document. Missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Returning to the same site after this many seconds without a tick counts as a new visit.
    pub visit_gap_seconds: u64,
    pub heartbeat_ms: u64,
    /// Reported to the host so it can configure its idle detection.
    pub idle_threshold_seconds: u64,
    /// Only URLs matched by an enabled rule are tracked when set.
    pub track_only_matched_rules: bool,
    pub notifications: NotificationSettings,
    pub privacy: PrivacySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            visit_gap_seconds: 30,
            heartbeat_ms: 1000,
            idle_threshold_seconds: 60,
            track_only_matched_rules: false,
            notifications: NotificationSettings::default(),
            privacy: PrivacySettings::default(),
        }
    }
}

impl Settings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    /// Shallow-merges a partial settings object over these settings. Unknown fields are ignored,
    /// fields of the wrong type are rejected.
    pub fn merged_with(&self, partial: Value) -> Result<Settings, TrackerError> {
        let invalid = |source| TrackerError::InvalidPayload {
            kind: "UPDATE_SETTINGS".into(),
            source,
        };
        let mut current = serde_json::to_value(self).map_err(invalid)?;
        if let (Value::Object(current), Value::Object(partial)) = (&mut current, partial) {
            current.extend(partial);
        }
        serde_json::from_value(current).map_err(invalid)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Per-site daily limits in minutes.
    pub thresholds: BTreeMap<String, u64>,
    /// Daily limit across all sites in minutes.
    pub global_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacySettings {
    pub allow_export_only: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            allow_export_only: true,
        }
    }
}

pub async fn load_settings(store: &impl KeyValueStore) -> Result<Settings, StoreError> {
    Ok(read_document(store, SETTINGS_KEY).await?.unwrap_or_default())
}

pub async fn save_settings(store: &impl KeyValueStore, settings: &Settings) -> Result<(), StoreError> {
    write_document(store, SETTINGS_KEY, settings).await
}
