use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "sitetime-host", version, about = "Tracker host speaking JSON lines over stdio")]
pub struct HostArgs {
    /// Application directory. By default $XDG_STATE_HOME/sitetime or $HOME/.local/state/sitetime.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Mirror logs to stderr. Stdout is reserved for the protocol.
    #[arg(long = "log-stderr")]
    pub log_stderr: bool,
    #[arg(long = "flush-interval-secs", default_value_t = 30)]
    pub flush_interval_secs: u64,
    #[arg(long = "notify-interval-secs", default_value_t = 1800)]
    pub notify_interval_secs: u64,
}
