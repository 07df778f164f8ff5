use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use crate::config::resource::DEFAULT_RESOURCE_PREFIX;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin agent
    Daemon(DaemonArgs),
    /// Run one discovery pass and print the resulting pools as JSON
    Discover(DiscoverArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    #[arg(
        long,
        env = "PCIDP_CONFIG_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/etc/pcidp/config.json",
        help = "Path of the JSON resource list"
    )]
    pub config_file: PathBuf,

    #[arg(
        long,
        env = "PCIDP_SYSFS_ROOT",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/",
        help = "Root under which sys/ and dev/ are read, e.g. /host when running in a container"
    )]
    pub sysfs_root: PathBuf,

    #[arg(
        long,
        env = "PCIDP_RESOURCE_PREFIX",
        default_value = DEFAULT_RESOURCE_PREFIX,
        help = "Resource prefix for resources that do not set their own"
    )]
    pub resource_prefix: String,

    #[arg(
        long,
        env = "PCIDP_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(
        long,
        env = "PCIDP_REFRESH_INTERVAL_SECS",
        default_value = "30",
        help = "Seconds between two discovery passes"
    )]
    pub refresh_interval_secs: u64,
}

#[derive(Args, Clone, Debug)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}
