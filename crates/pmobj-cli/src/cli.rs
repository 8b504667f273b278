use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pmobj",
    about = "pmobj: persistent-memory object cache tools",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Toml,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the effective cache configuration
    Config(ConfigArgs),
    /// Validate a cache configuration file
    Check(CheckArgs),
    /// Run a synthetic multi-threaded hold/release workload
    Bench(BenchArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Cache configuration file (TOML); defaults apply when omitted
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Cache configuration file (TOML)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct BenchArgs {
    /// Cache configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Workload description file (TOML)
    #[arg(long)]
    pub workload: Option<PathBuf>,
    #[arg(long)]
    pub threads: Option<usize>,
    /// Operations per thread
    #[arg(long)]
    pub ops: Option<u64>,
    /// Number of distinct objects
    #[arg(long)]
    pub objects: Option<u64>,
    #[arg(long)]
    pub seed: Option<u64>,
}
