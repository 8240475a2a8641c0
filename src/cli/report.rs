use std::{fmt::Display, fmt::Write, path::PathBuf};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::{
    fs::operations::write_atomic,
    report::Reports,
    storage::{
        entities::{SeriesPoint, Summary},
        kv::KeyValueStore,
    },
    utils::time::{format_seconds, Period},
};

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct SummaryCommand {
    #[arg(long, short, default_value_t = Period::Day)]
    period: Period,
    #[arg(long, short, help = "Only show this site key")]
    site: Option<String>,
    #[arg(
        long,
        short,
        help = "Last day of the period. Examples are \"yesterday\", \"last friday\", \"15/03/2025\""
    )]
    date: Option<String>,
}

#[derive(Debug, Parser)]
pub struct SeriesCommand {
    #[arg(long, short, default_value_t = Period::Week)]
    period: Period,
    #[arg(long, short, help = "Only count this site key")]
    site: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ExportCommand {
    #[arg(long, short, default_value_t = Period::Month)]
    period: Period,
    #[arg(long, short, help = "Only export this site key")]
    site: Option<String>,
    #[arg(long, short, help = "Write into a file instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[group(required = true, multiple = false)]
pub struct ClearCommand {
    #[arg(long, help = "Remove days strictly before this date, e.g. \"30 days ago\"")]
    before: Option<String>,
    #[arg(long, help = "Remove every recorded day")]
    all: bool,
}

/// Parses a natural language date the same way for every command.
pub fn parse_date(value: &str, style: DateStyle) -> Result<NaiveDate> {
    match parse_date_string(value, Local::now(), style.into()) {
        Ok(v) => Ok(v.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {value:?}: {e}"),
            )
            .into()),
    }
}

pub async fn process_summary_command<K: KeyValueStore>(
    reports: &Reports<K>,
    SummaryCommand { period, site, date }: SummaryCommand,
    style: DateStyle,
) -> Result<()> {
    let end = date.map(|v| parse_date(&v, style)).transpose()?;
    let summary = reports.summary(period, site.as_deref(), end).await?;
    print!("{}", summary_table(&summary));
    Ok(())
}

pub async fn process_series_command<K: KeyValueStore>(
    reports: &Reports<K>,
    SeriesCommand { period, site }: SeriesCommand,
) -> Result<()> {
    let series = reports.series(period, site.as_deref()).await?;
    print!("{}", series_lines(&series));
    Ok(())
}

pub async fn process_export_command<K: KeyValueStore>(
    reports: &Reports<K>,
    ExportCommand {
        period,
        site,
        output,
    }: ExportCommand,
) -> Result<()> {
    let csv = reports.export_csv(period, site.as_deref()).await?;
    match output {
        Some(path) => write_atomic(&path, csv.as_bytes()).await?,
        None => print!("{csv}"),
    }
    Ok(())
}

pub async fn process_clear_command<K: KeyValueStore>(
    reports: &Reports<K>,
    ClearCommand { before, all }: ClearCommand,
    style: DateStyle,
) -> Result<()> {
    let before = match before {
        Some(v) if !all => Some(parse_date(&v, style)?),
        _ => None,
    };
    let removed = reports.clear(before).await?;
    println!("Removed {removed} days");
    Ok(())
}

/// Sites ordered by time spent, longest first, then a total line.
fn summary_table(summary: &Summary) -> String {
    let mut sites = summary.sites.iter().collect::<Vec<_>>();
    sites.sort_by(|(a_key, a), (b_key, b)| b.seconds.cmp(&a.seconds).then(a_key.cmp(b_key)));

    let mut output = String::new();
    for (site, totals) in sites {
        let _ = writeln!(
            output,
            "{}\t{}\t{}",
            format_seconds(totals.seconds),
            totals.visits,
            site
        );
    }
    let total = summary.total();
    let _ = writeln!(
        output,
        "{}\t{}\ttotal",
        format_seconds(total.seconds),
        total.visits
    );
    output
}

fn series_lines(series: &[SeriesPoint]) -> String {
    let mut output = String::new();
    for point in series {
        let _ = writeln!(
            output,
            "{}\t{}\t{}",
            point.date,
            format_seconds(point.seconds),
            point.visits
        );
    }
    output
}
