use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sensor-poller",
    version,
    about = "Polls a sensor or weather source and derives metrics and alerts"
)]
pub struct Args {
    /// JSON settings file with channels, thresholds and the comfort band.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    /// Lookback window label (1h, 6h, 24h, 7d, 30d).
    #[arg(long, global = true)]
    pub window: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll on the configured interval until interrupted.
    Run,
    /// Poll once and print the derived snapshot as JSON.
    Once,
    /// Poll once and write the windowed series as CSV.
    Export {
        /// Output directory; the file is named sensor-data-YYYY-MM-DD.csv.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Print to stdout instead of writing a file.
        #[arg(long, default_value_t = false)]
        stdout: bool,
    },
    /// Load and validate configuration, then print a summary.
    CheckConfig,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
