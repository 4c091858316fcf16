//! Cycler CLI - runs the state-transformation pipeline on a fixed cadence.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::CyclerConfig;
use cycler_execution::{Pipeline, Scheduler};
use cycler_sink::{FanoutSink, ResultSink};
use cycler_stages::StageRegistry;
use cycler_storage::{InMemoryStateStore, JsonStateStore, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cycler")]
#[command(about = "Continuous state-transformation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cycles until Ctrl-C (or until the cycle limit is reached)
    Run {
        /// Config file (defaults to ./cycler.json when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many cycles, overriding maxCycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// List registered stages
    Stages,
    /// Validate a config file and print the resolved pipeline
    Check {
        /// Config file (defaults to ./cycler.json when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let registry = StageRegistry::with_builtins();

    match cli.command {
        Commands::Run { config, cycles } => {
            let mut config = CyclerConfig::load_or_default(config.as_deref())?;
            if cycles.is_some() {
                config.max_cycles = cycles;
            }
            run(config, &registry).await?;
        }
        Commands::Stages => {
            println!("Stages ({})", registry.list().len());
            for stage in registry.list() {
                println!("  {:<10} {}", stage.name(), stage.description());
            }
        }
        Commands::Check { config } => {
            let config = CyclerConfig::load_or_default(config.as_deref())?;
            let pipeline = build_pipeline(&config, &registry)?;

            println!("Config OK");
            println!("  Pipeline: {}", pipeline.id());
            println!("  Interval: {}ms", config.cycle_interval_ms);
            println!("  Timeout: {}ms", config.cycle_timeout_ms);
            match config.max_cycles {
                Some(n) => println!("  Max cycles: {}", n),
                None => println!("  Max cycles: unbounded"),
            }
            match &config.state_path {
                Some(path) => println!("  State: {}", path.display()),
                None => println!("  State: in-memory"),
            }
            println!("  Sinks: {}", config.sinks.len());
        }
    }

    Ok(())
}

fn build_pipeline(config: &CyclerConfig, registry: &StageRegistry) -> Result<Pipeline> {
    config.validate(registry)?;
    let stages = registry.resolve(&config.stage_order)?;
    Ok(Pipeline::from_stages(stages)?)
}

async fn run(config: CyclerConfig, registry: &StageRegistry) -> Result<()> {
    let pipeline = build_pipeline(&config, registry)?;

    let store: Arc<dyn StateStore> = match &config.state_path {
        Some(path) => Arc::new(
            JsonStateStore::open(path, config.seed())
                .await
                .with_context(|| format!("opening state store at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryStateStore::new(config.seed())),
    };

    let mut sinks = config.build_sinks().await?;
    let sink: Arc<dyn ResultSink> = if sinks.len() == 1 {
        sinks.remove(0)
    } else {
        Arc::new(FanoutSink::new(sinks))
    };

    let scheduler = Scheduler::new(pipeline, store, sink, config.scheduler_config())?;
    scheduler.start().await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("Interrupted, stopping after the current cycle");
            scheduler.stop().await;
        }
        _ = scheduler.join() => {}
    }
    scheduler.join().await;

    let status = scheduler.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let Some(fatal) = status.fatal {
        anyhow::bail!("stopped on fatal error: {}", fatal);
    }
    Ok(())
}
