//! Per-site browsing time tracker. A host process receives tab, focus and idle activity over
//! stdio, times the active site, and aggregates seconds and visits into day buckets. The CLI
//! reads the same store for summaries, series and CSV export.

pub mod cli;
pub mod daemon;
pub mod error;
pub mod fs;
pub mod protocol;
pub mod report;
pub mod rules;
pub mod settings;
pub mod storage;
pub mod tracker;
pub mod utils;
