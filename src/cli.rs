use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "cabourotte")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Health-check daemon with multi-source probe reconciliation")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", default_value = "cabourotte.yml")]
    pub config: PathBuf,

    /// Log filter directives (e.g. "info" or "cabourotte=debug")
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "plain")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
