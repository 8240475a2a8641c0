use std::fmt::Write;

use crate::{
    error::StoreError,
    storage::{aggregate::AggregateStore, kv::KeyValueStore},
    utils::time::{date_key, Period},
};

pub const CSV_HEADER: &str = "date,siteKey,secondsSpent,minutesSpent,visits";

/// Characters that make spreadsheet applications treat a cell as a formula.
const FORMULA_TRIGGERS: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

/// Neutralizes formula injection by prefixing a quote, then applies regular CSV quoting.
pub fn escape_field(value: &str) -> String {
    let value = if value.starts_with(FORMULA_TRIGGERS) {
        format!("'{value}")
    } else {
        value.to_owned()
    };

    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

fn push_row(csv: &mut String, date: &str, site_key: &str, seconds: u64, visits: u64) {
    let minutes = (seconds + 30) / 60;
    let fields = [
        escape_field(date),
        escape_field(site_key),
        escape_field(&seconds.to_string()),
        escape_field(&minutes.to_string()),
        escape_field(&visits.to_string()),
    ];
    // Writing into a String can't fail.
    let _ = writeln!(csv, "{}", fields.join(","));
}

/// Without a site, one row per site present in each day of the period. With a site, exactly one
/// row per day, zero-filled.
pub async fn export_csv<K: KeyValueStore>(
    store: &AggregateStore<K>,
    period: Period,
    site_key: Option<&str>,
) -> Result<String, StoreError> {
    let mut csv = format!("{CSV_HEADER}\n");

    match site_key {
        None => {
            let buckets = store.read_buckets(&period.dates(store.today())).await?;
            for (date, bucket) in buckets {
                let Some(bucket) = bucket else { continue };
                let date = date_key(date);
                for (site, totals) in bucket.sites {
                    push_row(&mut csv, &date, &site, totals.seconds, totals.visits);
                }
            }
        }
        Some(site_key) => {
            for point in store.series(period, Some(site_key)).await? {
                push_row(&mut csv, &point.date, site_key, point.seconds, point.visits);
            }
        }
    }

    Ok(csv)
}
