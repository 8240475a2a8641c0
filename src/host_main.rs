use std::{env::args, time::Duration};

use anyhow::Result;
use clap::Parser;
use sitetime::{
    daemon::{args::HostArgs, start_host},
    tracker::service::Schedule,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run(HostArgs::parse_from(args()))
}

fn run(args: HostArgs) -> Result<()> {
    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    enable_logging(HOST_PREFIX, &app_dir, args.log, args.log_stderr)?;

    let schedule = Schedule {
        flush_interval: Duration::from_secs(args.flush_interval_secs.max(1)),
        notify_interval: Duration::from_secs(args.notify_interval_secs.max(1)),
    };
    let runtime = single_thread_runtime()?;
    runtime.block_on(async move { start_host(app_dir, schedule).await })?;
    // A pending stdin read lives on a blocking thread and would hold the runtime open.
    runtime.shutdown_timeout(Duration::from_millis(100));
    Ok(())
}
