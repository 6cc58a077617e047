//! Deckhand - entry point
//!
//! CLI for the deckhand deployment orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, warn};

use deckhand::config::Settings;
use deckhand::deploy::context::Application;
use deckhand::deploy::roles::{Role, RoleFilter};
use deckhand::deploy::run::DeploymentRun;
use deckhand::deploy::stage::Stage;
use deckhand::deploy::task::{default_pipeline, find_task, task_catalog, Task};
use deckhand::logs::{init_logging, LogOptions};
use deckhand::models::report::{RunOutcome, RunReport, TaskStatus};
use deckhand::remote::ssh::SshExecutor;
use deckhand::scaffold::ConfigGenerator;

#[derive(Parser, Debug)]
#[command(name = "deckhand")]
#[command(author, version, about = "Stage-aware deployment orchestrator", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the deployment pipeline for an application
    Deploy {
        /// Application name
        application: String,

        /// Target stage
        #[arg(long, value_enum)]
        stage: Stage,

        /// Run a single catalog task instead of the full pipeline
        #[arg(long)]
        task: Option<String>,

        /// Comma-separated target hosts
        #[arg(long, value_delimiter = ',')]
        hosts: Vec<String>,

        /// Settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write initial deployment configuration into a project directory
    Scaffold {
        /// Target project directory
        path: PathBuf,
    },

    /// List the task catalog
    Tasks,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = cli.log_level.parse().unwrap_or_default();
    let log_options = LogOptions {
        log_level,
        json_format: cli.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let code = match cli.command {
        Commands::Deploy {
            application,
            stage,
            task,
            hosts,
            settings,
            json,
        } => deploy(application, stage, task, hosts, settings, json).await,
        Commands::Scaffold { path } => scaffold(&path),
        Commands::Tasks => {
            list_tasks();
            0
        }
    };

    std::process::exit(code);
}

async fn deploy(
    application: String,
    stage: Stage,
    task: Option<String>,
    hosts: Vec<String>,
    settings_path: Option<PathBuf>,
    json: bool,
) -> i32 {
    let settings = match settings_path {
        Some(path) => match Settings::load(&path).await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Unable to read settings file: {}", e);
                return 2;
            }
        },
        None => Settings::default(),
    };

    let application = match Application::new(application) {
        Ok(application) => application,
        Err(e) => {
            error!("{}", e);
            return 2;
        }
    };

    let tasks: Vec<Task> = match &task {
        Some(name) => match find_task(name) {
            Some(task) => vec![task],
            None => {
                error!("Unknown task '{}'", name);
                return 2;
            }
        },
        None => default_pipeline(),
    };

    let user = settings
        .ssh
        .user
        .clone()
        .unwrap_or_else(|| application.name().to_string());
    let remote = Arc::new(SshExecutor::new(user, &settings.ssh));

    // Ctrl+C stops the run at the next task boundary; the in-flight
    // command is left to finish or time out
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current task...");
            let _ = cancel_tx.send(true);
        }
    });

    let run = DeploymentRun::new(settings, remote).with_cancel(cancel_rx);
    let report = run.run(application, stage, &hosts, &tasks).await;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => error!("Failed to render report: {}", e),
        }
    } else {
        print_summary(&report);
    }

    report.exit_code()
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "{} {} -> {}  (run {})",
        "Deployment".bold(),
        report.application.cyan(),
        report.stage.cyan(),
        report.run_id
    );

    for result in &report.results {
        let status = match result.status {
            TaskStatus::Success => "ok".green(),
            TaskStatus::Failed => "failed".red(),
            TaskStatus::Skipped => "skipped".yellow(),
        };
        print!(
            "  {:<20} {:<28} {:>7}  {:>6}ms",
            result.task, result.host, status, result.duration_ms
        );
        if result.status != TaskStatus::Success && !result.output_excerpt.is_empty() {
            print!("  {}", result.output_excerpt.dimmed());
        }
        println!();
    }

    println!();
    match report.outcome {
        RunOutcome::Completed => println!("{}", "Completed".green().bold()),
        RunOutcome::Failed => println!(
            "{}: {}",
            "Failed".red().bold(),
            report.error.as_deref().unwrap_or("task failure")
        ),
        RunOutcome::Aborted => println!(
            "{}: {}",
            "Aborted".red().bold(),
            report.error.as_deref().unwrap_or("configuration error")
        ),
    }
}

fn scaffold(path: &PathBuf) -> i32 {
    match ConfigGenerator::scaffold(path) {
        Ok(written) => {
            println!(
                "Wrote {} file(s) under {}",
                written.len(),
                path.display()
            );
            0
        }
        Err(e) => {
            error!("Scaffolding failed: {}", e);
            1
        }
    }
}

fn list_tasks() {
    for task in task_catalog() {
        let roles = match task.role_filter {
            RoleFilter::All => "all",
            RoleFilter::Only(Role::Database) => "db",
            RoleFilter::Only(Role::Application) => "app",
            RoleFilter::Only(Role::Web) => "web",
        };

        let mut flags = Vec::new();
        if task.skip_if_fresh_deploy {
            flags.push("skip-on-fresh".to_string());
        }
        if task.best_effort {
            flags.push("best-effort".to_string());
        }
        if let Some(stages) = task.stage_gate {
            let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
            flags.push(format!("stages: {}", names.join(",")));
        }

        println!("  {:<20} roles: {:<4} {}", task.name.bold(), roles, flags.join("  "));
    }
}
