use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use taskmgr::params::{TASK_DURATION, TASK_TIMEOUT};
use taskmgr::{
    FnTask, LocalTransport, ParameterSet, Scheduler, StepContext, StepResult, TaskClient,
    TaskRegistry, TaskState, TaskStatus, WaitTask,
};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskmgr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("taskmgr.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Tasks compiled into the binary
fn build_registry(config: &Config) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(
        WaitTask::new("Test").with_default_duration(config.wait.default_duration_secs),
    ))?;
    registry.register(Arc::new(
        FnTask::new("Heartbeat", |ctx: &StepContext<'_>| {
            info!(
                "{} #{} alive after {:.1}s",
                ctx.name(),
                ctx.step_index(),
                ctx.elapsed().as_secs_f64()
            );
            StepResult::Incomplete
        })
        .with_description("Log one line per step until stopped"),
    ))?;
    Ok(registry)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let registry = build_registry(config)?;
    let scheduler = Scheduler::new(registry, config.scheduler.clone())
        .context("Failed to create scheduler")?;

    match &cli.command {
        Commands::Tasks => handle_tasks_command(&scheduler).await,
        Commands::Run {
            start,
            period,
            auto_restart,
            params,
        } => {
            let params = Commands::param_set(params);
            handle_run_command(&scheduler, start.as_deref(), *period, *auto_restart, params).await
        }
        Commands::Demo => handle_demo_command(&scheduler).await,
    }
}

async fn handle_tasks_command(scheduler: &Scheduler) -> Result<()> {
    let client = TaskClient::new(LocalTransport::new(scheduler.clone()));
    let tasks = client.task_directory().await?;
    println!("{}", "Registered tasks:".green());
    for task in tasks {
        match task.description {
            Some(description) => println!("  {:<12} {}", task.name.cyan(), description),
            None => println!("  {}", task.name.cyan()),
        }
    }
    Ok(())
}

async fn handle_run_command(
    scheduler: &Scheduler,
    start: Option<&str>,
    period: f64,
    auto_restart: bool,
    params: ParameterSet,
) -> Result<()> {
    scheduler.start_scheduler()?;
    println!(
        "{} tick every {:?}, Ctrl-C to stop",
        "Scheduler running:".green(),
        scheduler.config().tick_interval()
    );

    if let Some(name) = start {
        let client = TaskClient::new(LocalTransport::new(scheduler.clone()));
        let instance_id = client
            .start_task(name, auto_restart, period, params)
            .await
            .context(format!("Failed to start {}", name))?;
        println!("{} {} (instance {})", "Started:".green(), name, instance_id);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    println!("{}", "Shutting down...".yellow());
    scheduler.shutdown().await;
    Ok(())
}

/// Start Test with a long duration and a short timeout, then watch it
async fn handle_demo_command(scheduler: &Scheduler) -> Result<()> {
    scheduler.start_scheduler()?;
    let client = TaskClient::new(LocalTransport::new(scheduler.clone()));

    let params = ParameterSet::new().with(TASK_DURATION, 50.0).with(TASK_TIMEOUT, 5.0);
    let instance_id = client.start_task("Test", false, 0.5, params).await?;
    println!("{} Test (instance {})", "Started:".green(), instance_id);

    for second in 1..=8 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let statuses = client.status_map().await?;
        println!("{}", format!("t+{}s", second).bold());
        for status in statuses.values() {
            print_status(status);
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn print_status(status: &TaskStatus) {
    let state = match status.state {
        TaskState::Active => status.state.to_string().green(),
        TaskState::Idle => status.state.to_string().normal(),
        TaskState::TimedOut => status.state.to_string().yellow(),
        TaskState::Error => status.state.to_string().red(),
    };
    print!("  {:<12} {:<9} elapsed {:>5.1}s", status.name, state, status.elapsed);
    if let Some(outcome) = status.last_outcome {
        print!("  last: {:?}", outcome);
    }
    if let Some(err) = &status.last_error {
        print!("  error: {}", err.red());
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
