use clap::{Parser, Subcommand};
use eyre::Result;

use tempostore::TaskStore;

#[derive(Parser)]
#[command(name = "tempostore", about = "Inspect a tempo task store")]
struct Cli {
    /// Path to the store database
    #[arg(short, long, default_value = "tempo.db")]
    store: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all task records
    List,
    /// Show one task record as JSON
    Show { id: String },
    /// Show the execution history of a task
    Executions { id: String },
    /// Aggregate record counts
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = TaskStore::open(&cli.store)?;

    match cli.command {
        Command::List => {
            for task in store.all_tasks()? {
                println!("{:<24} {:<8} {:<8} {}", task.id, task.kind, task.status, task.name.unwrap_or_default());
            }
        }
        Command::Show { id } => {
            match store.get_task(&id)? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => println!("No task with id: {id}"),
            }
        }
        Command::Executions { id } => {
            for exec in store.executions_for_task(&id)? {
                println!(
                    "{:<38} {:<8} attempt {} {}",
                    exec.id,
                    exec.status,
                    exec.attempt,
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
