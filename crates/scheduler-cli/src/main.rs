use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use scheduler_core::{
    BroadcastEventPublisher, Error, LifecycleOrchestrator, PostgresStore, Result, SchedulerConfig,
};

#[derive(Parser)]
#[command(name = "scheduler")]
#[command(about = "HTTP-invoked recurring job scheduler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the scheduler and run until interrupted
    Serve,

    /// Manually trigger a job by id and print its outcome
    Trigger {
        #[arg(help = "Job id (UUID)")]
        job_id: uuid::Uuid,
    },

    /// Validate a 5-field cron expression and print its next two firings
    ValidateCron {
        #[arg(help = "Cron expression, e.g. \"*/5 * * * *\"")]
        expression: String,
    },
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig> {
    match &cli.config {
        Some(path) => SchedulerConfig::load(path.to_str().unwrap_or_default()),
        None => SchedulerConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Serve => run_serve(&cli).await,
        Commands::Trigger { job_id } => run_trigger(&cli, job_id).await,
        Commands::ValidateCron { expression } => run_validate_cron(&expression),
    }
}

async fn run_serve(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    info!(version = scheduler_core::VERSION, "starting scheduler");

    let store = Arc::new(PostgresStore::connect_lazy(&config.database.url, config.database.connection_limit as u32)?);
    let events = Arc::new(BroadcastEventPublisher::default());

    let orchestrator = LifecycleOrchestrator::start(store, events, &config).await?;

    tokio::signal::ctrl_c().await.map_err(|e| Error::Other(e.to_string()))?;
    info!("received shutdown signal");
    orchestrator.shutdown().await;

    Ok(())
}

async fn run_trigger(cli: &Cli, job_id: uuid::Uuid) -> Result<()> {
    let config = load_config(cli)?;
    let store = Arc::new(PostgresStore::connect_lazy(&config.database.url, config.database.connection_limit as u32)?);
    let events = Arc::new(BroadcastEventPublisher::default());

    let orchestrator = LifecycleOrchestrator::start(store, events, &config).await?;
    let outcome = orchestrator.trigger_manual(job_id).await?;

    println!("status: {:?}", outcome.status);
    if let Some(code) = outcome.response_status_code {
        println!("response status code: {}", code);
    }
    if let Some(message) = outcome.error_message {
        println!("error: {}", message);
    }

    orchestrator.shutdown().await;
    Ok(())
}

fn run_validate_cron(expression: &str) -> Result<()> {
    let outcome = scheduler_core::cron::validate(expression)?;
    println!("valid. next two firings (UTC):");
    println!("  {}", outcome.first_firing);
    println!("  {}", outcome.second_firing);
    Ok(())
}
