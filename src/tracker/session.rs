use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::StoreError,
    storage::{
        documents::{read_document, remove_document, write_document, CURRENT_SESSION_KEY},
        entities::SiteTotals,
        kv::KeyValueStore,
    },
};

use super::events::TabId;

/// The single active site. Also persisted under `currentSession` so that tracking resumes after
/// the host restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub site_key: String,
    pub tab_id: TabId,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_tick_at: DateTime<Utc>,
    /// Committed and pending seconds of this session.
    pub accumulated_seconds: u64,
}

impl Session {
    pub fn new(site_key: String, tab_id: TabId, rule_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            site_key,
            tab_id,
            rule_id,
            started_at: now,
            last_tick_at: now,
            accumulated_seconds: 0,
        }
    }

    /// Whole seconds since the last tick. Clock jumps backwards count as zero.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.last_tick_at).num_seconds()).unwrap_or(0)
    }
}

/// Seconds and visits not yet committed to a day bucket, per site.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingBuffer {
    sites: BTreeMap<String, SiteTotals>,
}

impl PendingBuffer {
    pub fn add(&mut self, site_key: &str, totals: SiteTotals) {
        if totals.is_zero() {
            return;
        }
        self.sites.entry(site_key.to_owned()).or_default().add(totals);
    }

    pub fn get(&self, site_key: &str) -> SiteTotals {
        self.sites.get(site_key).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.values().all(SiteTotals::is_zero)
    }

    pub fn sites(&self) -> &BTreeMap<String, SiteTotals> {
        &self.sites
    }

    pub fn clear(&mut self) {
        self.sites.clear();
    }
}

/// Live view of the current session, as broadcast with `TRACKING_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub is_active: bool,
    #[serde(flatten)]
    pub live: Option<LiveTotals>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTotals {
    pub site_key: String,
    pub seconds: u64,
    /// Visits to the site that are still pending.
    pub visits: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
}

impl TrackingState {
    pub fn idle() -> Self {
        Self {
            is_active: false,
            live: None,
        }
    }

    pub fn tracking(session: &Session, pending: &PendingBuffer) -> Self {
        Self {
            is_active: true,
            live: Some(LiveTotals {
                site_key: session.site_key.clone(),
                seconds: session.accumulated_seconds,
                visits: pending.get(&session.site_key).visits,
                start_time: session.started_at,
            }),
        }
    }
}

pub async fn load_snapshot(store: &impl KeyValueStore) -> Result<Option<Session>, StoreError> {
    read_document(store, CURRENT_SESSION_KEY).await
}

pub async fn save_snapshot(store: &impl KeyValueStore, session: &Session) -> Result<(), StoreError> {
    write_document(store, CURRENT_SESSION_KEY, session).await
}

pub async fn clear_snapshot(store: &impl KeyValueStore) -> Result<(), StoreError> {
    remove_document(store, CURRENT_SESSION_KEY).await
}
