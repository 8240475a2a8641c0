pub mod report;
pub mod rules;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use report::{
    process_clear_command, process_export_command, process_series_command,
    process_summary_command, ClearCommand, DateStyle, ExportCommand, SeriesCommand,
    SummaryCommand,
};
use rules::{process_rules_command, RulesCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::start_host,
    report::Reports,
    rules::book::RuleBook,
    storage::{aggregate::AggregateStore, file_store::FileStore},
    tracker::service::Schedule,
    utils::{
        clock::{Clock, DefaultClock},
        dir::{create_application_default_path, store_path},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Sitetime", version, long_about = None)]
#[command(about = "Reports on time spent per website", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        help = "Application directory. By default tries to use $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Time and visits per site over a period")]
    Summary {
        #[command(flatten)]
        command: SummaryCommand,
    },
    #[command(about = "Time and visits per day over a period")]
    Series {
        #[command(flatten)]
        command: SeriesCommand,
    },
    #[command(about = "Export daily totals as CSV")]
    Export {
        #[command(flatten)]
        command: ExportCommand,
    },
    #[command(about = "Remove recorded days")]
    Clear {
        #[command(flatten)]
        command: ClearCommand,
    },
    #[command(about = "Manage site rules")]
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    #[command(
        about = "Run the tracker host in the current console, reading activity from stdin. Used for debugging"
    )]
    Serve,
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let open_store = || FileStore::new(store_path(&app_dir));

    match args.commands {
        Commands::Serve => start_host(app_dir.clone(), Schedule::default()).await,
        Commands::Rules { command } => {
            process_rules_command(&RuleBook::new(open_store()?, clock), command).await
        }
        Commands::Summary { command } => {
            let reports = Reports::new(Arc::new(AggregateStore::new(open_store()?, clock)));
            process_summary_command(&reports, command, args.date_style).await
        }
        Commands::Series { command } => {
            let reports = Reports::new(Arc::new(AggregateStore::new(open_store()?, clock)));
            process_series_command(&reports, command).await
        }
        Commands::Export { command } => {
            let reports = Reports::new(Arc::new(AggregateStore::new(open_store()?, clock)));
            process_export_command(&reports, command).await
        }
        Commands::Clear { command } => {
            let reports = Reports::new(Arc::new(AggregateStore::new(open_store()?, clock)));
            process_clear_command(&reports, command, args.date_style).await
        }
    }
}
