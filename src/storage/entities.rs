use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds and visits attributed to one site.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTotals {
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub visits: u64,
}

impl SiteTotals {
    pub fn new(seconds: u64, visits: u64) -> Self {
        Self { seconds, visits }
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.visits == 0
    }

    pub fn add(&mut self, other: SiteTotals) {
        self.seconds += other.seconds;
        self.visits += other.visits;
    }
}

/// Durable aggregate for one calendar date, stored under `stats:<YYYY-MM-DD>`. Only ever mutated
/// by additive merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    #[serde(default)]
    pub sites: BTreeMap<String, SiteTotals>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl DayBucket {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            sites: BTreeMap::new(),
            updated_at: now,
        }
    }

    pub fn merge(&mut self, site_key: &str, totals: SiteTotals, now: DateTime<Utc>) {
        self.sites.entry(site_key.to_owned()).or_default().add(totals);
        self.updated_at = now;
    }
}

/// Totals per site over a range of days.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub sites: BTreeMap<String, SiteTotals>,
}

impl Summary {
    pub fn total(&self) -> SiteTotals {
        let mut total = SiteTotals::default();
        for site in self.sites.values() {
            total.add(*site);
        }
        total
    }
}

/// One day of a time series. Days without data are still present with zeroes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: String,
    pub seconds: u64,
    pub visits: u64,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{DayBucket, SiteTotals};

    #[test]
    fn test_merge_is_additive() {
        let now = Utc.timestamp_millis_opt(1_710_500_000_000).unwrap();
        let mut bucket = DayBucket::empty(now);
        bucket.merge("a.com", SiteTotals::new(10, 1), now);
        bucket.merge("a.com", SiteTotals::new(5, 0), now);
        bucket.merge("b.com", SiteTotals::new(1, 1), now);

        assert_eq!(bucket.sites["a.com"], SiteTotals::new(15, 1));
        assert_eq!(bucket.sites["b.com"], SiteTotals::new(1, 1));
    }

    #[test]
    fn test_bucket_wire_format() -> anyhow::Result<()> {
        let bucket: DayBucket = serde_json::from_value(json!({
            "sites": {"a.com": {"seconds": 3}},
            "updatedAt": 1_710_500_000_000i64
        }))?;
        assert_eq!(bucket.sites["a.com"], SiteTotals::new(3, 0));

        let value = serde_json::to_value(&bucket)?;
        assert_eq!(value["updatedAt"], json!(1_710_500_000_000i64));
        Ok(())
    }
}
