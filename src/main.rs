use clap::Parser;
use dotenv::dotenv;
use serde_json::json;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ecu_taskbus::{
    cli::{Cli, Commands, ConfigArgs, RunArgs},
    config::AppConfig,
    events::{EventBus, attach_event_logger},
    task_manager::JsonTaskScheduler,
    workload,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load environment variables from .env file before clap reads them
    dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize tracing with environment filter using CLI log level
    let log_level = format!("ecu_taskbus={},info", cli.log_level);
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Config(args) => print_config(args),
    }
}

async fn run(args: RunArgs) -> eyre::Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_run_args(&args);
    config.validate()?;

    let bus = EventBus::with_config(config.event_bus_config());
    attach_event_logger(&bus, "event_logger");

    let scheduler = JsonTaskScheduler::with_event_bus(config.scheduler_config(), bus.clone());
    scheduler.start().await?;

    let report = tokio::select! {
        report = workload::run_workload(&scheduler, &bus, &config.workload) => Some(report?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            None
        }
    };

    let shutdown = scheduler.shutdown().await;
    let summary = json!({
        "workload": report,
        "scheduler": scheduler.statistics(),
        "event_bus": bus.stats(),
        "shutdown": shutdown,
    });
    bus.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_config(args: ConfigArgs) -> eyre::Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    config.validate()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
