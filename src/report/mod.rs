//! Caller-facing queries over the aggregate store: summaries, series, CSV and notifications.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::{
    error::StoreError,
    storage::{
        aggregate::AggregateStore,
        entities::{SeriesPoint, Summary},
        kv::KeyValueStore,
    },
    utils::time::Period,
};

pub mod csv;
pub mod notify;

pub struct Reports<K> {
    store: Arc<AggregateStore<K>>,
}

impl<K: KeyValueStore> Reports<K> {
    pub fn new(store: Arc<AggregateStore<K>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AggregateStore<K> {
        &self.store
    }

    pub async fn summary(
        &self,
        period: Period,
        site_key: Option<&str>,
        end: Option<NaiveDate>,
    ) -> Result<Summary, StoreError> {
        self.store.summary(period, site_key, end).await
    }

    pub async fn series(
        &self,
        period: Period,
        site_key: Option<&str>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        self.store.series(period, site_key).await
    }

    pub async fn export_csv(&self, period: Period, site_key: Option<&str>) -> Result<String, StoreError> {
        csv::export_csv(&self.store, period, site_key).await
    }

    pub async fn clear(&self, before: Option<NaiveDate>) -> Result<usize, StoreError> {
        self.store.clear(before).await
    }
}
