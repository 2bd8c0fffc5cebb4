//! Configuration for overlay-transportd.

use clap::Parser;
use std::path::PathBuf;

/// overlay-transportd - managed transport demonstration daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "overlay-transportd")]
#[command(about = "Stands up a managed transport pair in-process and exchanges packets")]
pub struct Config {
    /// Data directory for persistent byte-counter logs
    #[arg(short, long, default_value = "./data/overlay-transportd")]
    pub data_dir: PathBuf,

    /// Link type both ends of the demonstration pair register under
    #[arg(long, default_value = "stcp")]
    pub link_type: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.link_type.is_empty() {
            anyhow::bail!("link type cannot be empty");
        }
        Ok(())
    }
}
