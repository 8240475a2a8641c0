use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
    error::StoreError,
    utils::{
        clock::Clock,
        time::{date_key, parse_date_key, Period},
    },
};

use super::{
    documents::STATS_PREFIX,
    entities::{DayBucket, SeriesPoint, SiteTotals, Summary},
    kv::KeyValueStore,
};

pub fn stats_key(date: NaiveDate) -> String {
    format!("{STATS_PREFIX}{}", date_key(date))
}

/// Date a timestamp falls on in the local calendar.
pub fn local_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&Local).date_naive()
}

/// Day-bucketed aggregate storage. Buckets are sparse: days without activity have no record and
/// read back as zero.
pub struct AggregateStore<K> {
    kv: K,
    clock: Arc<dyn Clock>,
}

impl<K: KeyValueStore> AggregateStore<K> {
    pub fn new(kv: K, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Underlying key-value namespace, shared with settings, rules and the session snapshot.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Adds seconds and visits for one site into the bucket of the day `timestamp` falls on.
    pub async fn merge_session(
        &self,
        site_key: &str,
        seconds: u64,
        visits: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let totals = BTreeMap::from([(site_key.to_owned(), SiteTotals::new(seconds, visits))]);
        self.merge_all(&totals, timestamp).await
    }

    /// Adds several sites into the same day bucket with a single write, so the merge either
    /// lands completely or not at all.
    #[instrument(skip(self, totals))]
    pub async fn merge_all(
        &self,
        totals: &BTreeMap<String, SiteTotals>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let date = local_date(timestamp);
        let key = stats_key(date);
        let now = self.clock.time();

        // A bucket that can't be parsed is left alone rather than replaced by an empty one.
        let mut bucket = match self.kv.get(std::slice::from_ref(&key)).await?.remove(&key) {
            Some(value) => serde_json::from_value::<DayBucket>(value)?,
            None => DayBucket::empty(now),
        };

        for (site_key, site_totals) in totals {
            if !site_totals.is_zero() {
                bucket.merge(site_key, *site_totals, now);
            }
        }

        debug!("Merging {} site(s) into {key}", totals.len());
        self.kv
            .set(vec![(key, serde_json::to_value(&bucket)?)])
            .await
    }

    /// Reads the buckets for the given dates in one batch. The result keeps the order of `dates`.
    pub async fn read_buckets(
        &self,
        dates: &[NaiveDate],
    ) -> Result<Vec<(NaiveDate, Option<DayBucket>)>, StoreError> {
        let keys = dates.iter().map(|date| stats_key(*date)).collect::<Vec<_>>();
        let mut values = self.kv.get(&keys).await?;

        Ok(dates
            .iter()
            .zip(keys)
            .map(|(date, key)| (*date, values.remove(&key).and_then(|v| parse_bucket(&key, v))))
            .collect())
    }

    /// Sums every site across the days of `period` ending at `end` (today by default),
    /// optionally restricted to one site.
    pub async fn summary(
        &self,
        period: Period,
        site_key: Option<&str>,
        end: Option<NaiveDate>,
    ) -> Result<Summary, StoreError> {
        let end = end.unwrap_or_else(|| self.today());
        let buckets = self.read_buckets(&period.dates(end)).await?;

        let mut summary = Summary::default();
        for (_, bucket) in buckets {
            let Some(bucket) = bucket else { continue };
            for (site, totals) in bucket.sites {
                if site_key.is_some_and(|wanted| wanted != site) {
                    continue;
                }
                summary.sites.entry(site).or_default().add(totals);
            }
        }
        Ok(summary)
    }

    /// One point per calendar day of `period` ending today, zero-filled.
    pub async fn series(
        &self,
        period: Period,
        site_key: Option<&str>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let buckets = self.read_buckets(&period.dates(self.today())).await?;

        Ok(buckets
            .into_iter()
            .map(|(date, bucket)| {
                let mut totals = SiteTotals::default();
                for (site, site_totals) in bucket.map(|b| b.sites).unwrap_or_default() {
                    if site_key.map_or(true, |wanted| wanted == site) {
                        totals.add(site_totals);
                    }
                }
                SeriesPoint {
                    date: date_key(date),
                    seconds: totals.seconds,
                    visits: totals.visits,
                }
            })
            .collect())
    }

    /// Removes whole day buckets: all of them, or only those dated strictly before `before`.
    /// Returns how many buckets were removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, before: Option<NaiveDate>) -> Result<usize, StoreError> {
        let keys = self
            .kv
            .keys()
            .await?
            .into_iter()
            .filter(|key| match key.strip_prefix(STATS_PREFIX) {
                None => false,
                Some(_) if before.is_none() => true,
                Some(date) => match (parse_date_key(date), before) {
                    (Some(date), Some(before)) => date < before,
                    _ => {
                        warn!("Skipping bucket with unreadable date {key}");
                        false
                    }
                },
            })
            .collect::<Vec<_>>();

        if keys.is_empty() {
            return Ok(0);
        }
        self.kv.remove(&keys).await?;
        Ok(keys.len())
    }
}

fn parse_bucket(key: &str, value: Value) -> Option<DayBucket> {
    match serde_json::from_value(value) {
        Ok(bucket) => Some(bucket),
        Err(e) => {
            warn!("Ignoring malformed day bucket {key}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::NaiveDate;
    use serde_json::json;

    use crate::{
        error::StoreError,
        storage::{
            entities::SiteTotals,
            kv::{KeyValueStore, MemoryStore},
        },
        utils::{
            clock::{
                testing::{local_time, ManualClock},
                Clock,
            },
            time::Period,
        },
    };

    use super::{stats_key, AggregateStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn store_at(clock: &ManualClock) -> AggregateStore<Arc<MemoryStore>> {
        AggregateStore::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_merge_accumulates_into_day_bucket() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);

        store.merge_session("a.com", 30, 1, local_time(2024, 3, 15, 12, 0, 0)).await?;
        store.merge_session("a.com", 15, 0, local_time(2024, 3, 15, 13, 0, 0)).await?;
        store.merge_session("a.com", 5, 1, local_time(2024, 3, 16, 12, 0, 0)).await?;

        let buckets = store
            .read_buckets(&[date(2024, 3, 15), date(2024, 3, 16), date(2024, 3, 17)])
            .await?;
        assert_eq!(
            buckets[0].1.as_ref().unwrap().sites["a.com"],
            SiteTotals::new(45, 1)
        );
        assert_eq!(
            buckets[1].1.as_ref().unwrap().sites["a.com"],
            SiteTotals::new(5, 1)
        );
        assert!(buckets[2].1.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_week_summary_covers_seven_days() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 20, 12, 0, 0));
        let store = store_at(&clock);

        store.merge_session("a.com", 100, 1, local_time(2024, 3, 8, 12, 0, 0)).await?;
        store.merge_session("a.com", 10, 1, local_time(2024, 3, 9, 12, 0, 0)).await?;
        store.merge_session("b.com", 20, 2, local_time(2024, 3, 12, 12, 0, 0)).await?;
        store.merge_session("a.com", 30, 1, local_time(2024, 3, 15, 12, 0, 0)).await?;
        store.merge_session("a.com", 1000, 1, local_time(2024, 3, 16, 12, 0, 0)).await?;

        let summary = store.summary(Period::Week, None, Some(date(2024, 3, 15))).await?;
        assert_eq!(summary.sites.len(), 2);
        assert_eq!(summary.sites["a.com"], SiteTotals::new(40, 2));
        assert_eq!(summary.sites["b.com"], SiteTotals::new(20, 2));

        let filtered = store
            .summary(Period::Week, Some("b.com"), Some(date(2024, 3, 15)))
            .await?;
        assert_eq!(filtered.sites.len(), 1);
        assert_eq!(filtered.total(), SiteTotals::new(20, 2));

        let untouched = store
            .summary(Period::Week, Some("c.com"), Some(date(2024, 3, 15)))
            .await?;
        assert_eq!(untouched.total(), SiteTotals::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_defaults_to_today() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);
        store.merge_session("a.com", 7, 1, clock.time()).await?;

        let summary = store.summary(Period::Day, None, None).await?;
        assert_eq!(summary.sites["a.com"], SiteTotals::new(7, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_series_for_empty_day_is_zero_filled() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);

        let series = store.series(Period::Day, None).await?;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].date, "2024-03-15");
        assert_eq!((series[0].seconds, series[0].visits), (0, 0));
        Ok(())
    }

    #[tokio::test]
    async fn test_series_is_contiguous_and_filtered() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);
        store.merge_session("a.com", 60, 1, local_time(2024, 3, 10, 12, 0, 0)).await?;
        store.merge_session("b.com", 40, 1, local_time(2024, 3, 10, 12, 0, 0)).await?;
        store.merge_session("a.com", 5, 1, local_time(2024, 3, 15, 12, 0, 0)).await?;

        let series = store.series(Period::Week, None).await?;
        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, "2024-03-09");
        assert_eq!(series[1].seconds, 100);
        assert_eq!(series[1].visits, 2);
        assert_eq!(series[2].seconds, 0);

        let only_a = store.series(Period::Week, Some("a.com")).await?;
        assert_eq!(only_a[1].seconds, 60);
        assert_eq!(only_a[6].seconds, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_before_date() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);
        for (y, m, d) in [(2023, 12, 30), (2023, 12, 31), (2024, 1, 1), (2024, 1, 2)] {
            store.merge_session("a.com", 1, 1, local_time(y, m, d, 12, 0, 0)).await?;
        }
        store
            .kv()
            .set(vec![("settings".into(), json!({"visitGapSeconds": 30}))])
            .await?;

        assert_eq!(store.clear(Some(date(2024, 1, 1))).await?, 2);

        let mut keys = store.kv().keys().await?;
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "settings".to_string(),
                stats_key(date(2024, 1, 1)),
                stats_key(date(2024, 1, 2)),
            ]
        );

        assert_eq!(store.clear(None).await?, 2);
        assert_eq!(store.kv().keys().await?, vec!["settings".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_into_malformed_bucket_fails() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let store = store_at(&clock);
        let key = stats_key(date(2024, 3, 15));
        let malformed = json!({"sites": {"a.com": {"seconds": "lots"}}});
        store.kv().set(vec![(key.clone(), malformed.clone())]).await?;

        let result = store.merge_session("a.com", 10, 1, clock.time()).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        assert_eq!(store.kv().get(&[key.clone()]).await?[&key], malformed);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_failure_leaves_bucket_untouched() -> Result<()> {
        let clock = ManualClock::new(local_time(2024, 3, 15, 12, 0, 0));
        let kv = Arc::new(MemoryStore::new());
        let store = AggregateStore::new(kv.clone(), Arc::new(clock.clone()));
        store.merge_session("a.com", 1, 1, local_time(2024, 3, 15, 12, 0, 0)).await?;

        kv.set_quota(Some(1));
        let result = store.merge_session("a.com", 10, 0, local_time(2024, 3, 15, 12, 0, 0)).await;
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));

        kv.set_quota(None);
        let summary = store.summary(Period::Day, None, None).await?;
        assert_eq!(summary.sites["a.com"], SiteTotals::new(1, 1));
        Ok(())
    }
}
