use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "network reachability watchdog")]
pub struct Args {
    /// Sub‑commands (run, probe, etc.)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Use system-wide config (/etc/linkwatchd/linkwatchd.toml)
    #[arg(long, conflicts_with = "config")]
    pub system: bool,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Watch the configured target (default if no sub‑command)
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Directory for the daily event log (default: `log` next to the config file)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Start with status output hidden; countdowns still show
        #[arg(long)]
        hidden: bool,

        /// Do not read commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Probe an address once (Exit 0 = reachable, 1 = unreachable)
    Probe {
        address: String,

        /// Probe timeout in seconds
        #[arg(long, default_value_t = 2)]
        timeout: u64,
    },
    /// Test and save a new target address
    SetTarget {
        address: String,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Run the configured action immediately
    Trigger {
        /// Confirm running the action
        #[arg(long)]
        yes: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the effective configuration
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}
