use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// YAML file to read the manager configuration from.
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
    /// Number of consumer workers, overriding the configuration file.
    #[arg(short = 'n', long)]
    pub(crate) consumers: Option<usize>,
    /// Milliseconds to defer consumer wake-ups by, overriding the
    /// configuration file.
    #[arg(short, long)]
    pub(crate) flush_interval_ms: Option<u64>,
    /// Number of demo jobs to enqueue.
    #[arg(short, long, default_value_t = 20)]
    pub(crate) jobs: u32,
    /// How long each demo job works for, in milliseconds.
    #[arg(short = 'w', long, default_value_t = 200)]
    pub(crate) work_ms: u64,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}
