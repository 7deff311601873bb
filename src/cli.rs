use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ecu-taskbus")]
#[command(about = "Priority task scheduler and event bus for ECU log processing")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the simulated import, analysis and export workload
    Run(RunArgs),

    /// Print the effective configuration as YAML
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "ECU_TASKBUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of worker loops
    #[arg(short, long, env = "ECU_TASKBUS_WORKERS")]
    pub workers: Option<usize>,

    /// Queue capacity; submissions beyond it are rejected
    #[arg(long, env = "ECU_TASKBUS_MAX_QUEUE_SIZE")]
    pub max_queue_size: Option<usize>,

    /// Number of CSV files to import
    #[arg(short, long)]
    pub imports: Option<usize>,

    /// Probability (0.0-1.0) that a single stage attempt fails
    #[arg(long)]
    pub fail_rate: Option<f64>,
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "ECU_TASKBUS_CONFIG")]
    pub config: Option<PathBuf>,
}
