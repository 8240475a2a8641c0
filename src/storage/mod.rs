//! Durable storage is organized around a [kv::KeyValueStore] namespace.
//! The basic idea is:
//!  - Every document (settings, rules, the session snapshot, day buckets) is a JSON value under a
//!    well known key, see [documents].
//!  - Activity is aggregated into one bucket per local calendar day, `stats:<YYYY-MM-DD>`, which
//!    is only ever changed by additive merges, see [aggregate::AggregateStore].
//!  - Range queries read the bucket of every day in the range in one batch.

pub mod aggregate;
pub mod documents;
pub mod entities;
pub mod file_store;
pub mod kv;
