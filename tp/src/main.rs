use clap::{Parser, Subcommand};
use eyre::Result;

use tempostore::{TaskStatus, TaskStore};

#[derive(Parser)]
#[command(name = "tempo", about = "Inspect a tempo runner's task store")]
struct Cli {
    /// Path to the store database
    #[arg(short, long, default_value = "tempo.db")]
    store: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List tasks, optionally filtered by status
    Tasks {
        /// pending | running | paused
        #[arg(long)]
        status: Option<String>,
    },
    /// Execution history for one task
    Executions { id: String },
    /// Aggregate counts
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = TaskStore::open(&cli.store)?;

    match cli.command {
        Command::Tasks { status } => {
            let tasks = match status {
                Some(status) => {
                    let status: TaskStatus = status.parse()?;
                    store.tasks_by_status(status)?
                }
                None => store.all_tasks()?,
            };
            for task in tasks {
                let trigger = task
                    .cron
                    .or(task.on_event)
                    .or_else(|| task.run_at.map(|t| t.to_rfc3339()))
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<8} {:<8} attempts {}  {}",
                    task.id, task.kind, task.status, task.attempts, trigger
                );
            }
        }
        Command::Executions { id } => {
            for exec in store.executions_for_task(&id)? {
                println!(
                    "{:<38} {:<8} attempt {}  started {}  {}",
                    exec.id,
                    exec.status,
                    exec.attempt,
                    exec.started_at.to_rfc3339(),
                    exec.error.unwrap_or_default()
                );
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("Tasks: {} total", stats.total);
            println!("  pending: {}", stats.pending);
            println!("  running: {}", stats.running);
            println!("  paused: {}", stats.paused);
            println!("Executions: {}", stats.executions);
        }
    }

    Ok(())
}
