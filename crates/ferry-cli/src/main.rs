//! ferry: inspect and exercise a durable offline operation queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferry_core::app::{EnqueueOptions, OfflineQueue, QueueBuilder, QueueConfig};
use ferry_core::domain::{OperationId, QueueEvent, QueueStats};
use ferry_core::impls::{BroadcastEventSink, InMemoryStore, JsonFileStore, ManualConnectivity, TracingEventSink};
use ferry_core::ports::{DurableStore, EventSink};
use ferry_core::typed::{Handler, HandlerError, Mutation};

/// ferry: durable client-side operation queue
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Inspect and exercise a durable offline operation queue")]
struct Args {
    /// Directory holding the persisted queue (in-memory when omitted for `demo`)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Queue config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enqueue a task while offline, reconnect, and watch it get delivered
    Demo {
        /// Title of the task to create
        #[arg(long, default_value = "Buy milk")]
        title: String,

        /// How many times the handler fails before succeeding
        #[arg(long, default_value_t = 1)]
        failures: u32,
    },
    /// Print queue statistics
    Status,
    /// List queued operations
    List {
        /// Only operations of this type
        #[arg(long)]
        op_type: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop every queued operation
    Clear,
    /// Drop one operation by id
    Remove { id: OperationId },
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateTask {
    title: String,
}

impl Mutation for CreateTask {
    const TYPE: &'static str = "createTask";
}

/// Stands in for a remote API that is flaky for the first few calls.
struct FlakyCreateTask {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Handler<CreateTask> for FlakyCreateTask {
    async fn handle(&self, task: CreateTask) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::transient(format!("503 from remote (failures left={left})")));
        }
        println!("created task {:?} on the remote", task.title);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = match &args.config {
        Some(path) => QueueConfig::load(path)?,
        None => QueueConfig::default(),
    };

    let store: Arc<dyn DurableStore> = match &args.data_dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir)?),
        None if matches!(args.command, Command::Demo { .. }) => Arc::new(InMemoryStore::new()),
        None => return Err("--data-dir is required for this command".into()),
    };

    match args.command {
        Command::Demo { title, failures } => run_demo(store, config, title, failures).await?,
        command => {
            let queue = QueueBuilder::new(store, Arc::new(ManualConnectivity::offline()))
                .config(config)
                .build()
                .await?;
            let result = inspect(&queue, command).await;
            queue.cleanup().await;
            result?;
        }
    }
    Ok(())
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn inspect(queue: &OfflineQueue, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Status => {
            let stats = queue.stats().await;
            println!("{}", serde_json::to_string_pretty(&status_view(&stats)?)?);
        }
        Command::List { op_type, json } => {
            let ops = match op_type {
                Some(t) => queue.by_type(&t).await,
                None => queue.pending().await,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&ops)?);
            } else {
                for op in ops {
                    println!(
                        "{}  {:<16} attempts={}/{}  created={}{}",
                        op.id,
                        op.op_type,
                        op.attempts,
                        op.max_attempts,
                        op.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                        op.last_error.map(|e| format!("  last_error={e}")).unwrap_or_default()
                    );
                }
            }
        }
        Command::Clear => {
            let n = queue.clear().await?;
            println!("cleared {n} operation(s)");
        }
        Command::Remove { id } => {
            if queue.remove(&id).await? {
                println!("removed {id}");
            } else {
                println!("{id} not found");
            }
        }
        Command::Demo { .. } => {}
    }
    Ok(())
}

/// Stats as shown by `status`. This process registers no handlers, so the
/// `stalled` count would flag every pending operation; it is left out.
fn status_view(stats: &QueueStats) -> Result<serde_json::Value, serde_json::Error> {
    let mut view = serde_json::to_value(stats)?;
    if let Some(fields) = view.as_object_mut() {
        fields.remove("stalled");
    }
    Ok(view)
}

/// Enough attempts for the flaky handler to get through.
fn demo_max_attempts(failures: u32) -> u32 {
    failures.saturating_add(1)
}

async fn run_demo(
    store: Arc<dyn DurableStore>,
    config: QueueConfig,
    title: String,
    failures: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let connectivity = Arc::new(ManualConnectivity::offline());
    let sink = BroadcastEventSink::default();
    let mut events = sink.subscribe();
    let sink: Arc<dyn EventSink> = Arc::new((sink, TracingEventSink));

    let queue = QueueBuilder::new(store, connectivity.clone())
        .config(config)
        .event_sink(sink)
        .register::<CreateTask, _>(FlakyCreateTask {
            remaining_failures: AtomicU32::new(failures),
        })
        .expect_types(&[CreateTask::TYPE])
        .build()
        .await?;

    let id = queue
        .enqueue_mutation(&CreateTask { title }, EnqueueOptions::new().max_attempts(demo_max_attempts(failures)))
        .await?;
    info!(op_id = %id, "enqueued while offline");
    println!("{}", serde_json::to_string_pretty(&queue.stats().await)?);

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("going online");
    connectivity.set_reachable(true);

    let outcome = tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Delivered { attempts, .. }) => return Some(attempts),
                Ok(QueueEvent::Exhausted { .. }) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    })
    .await;

    match outcome {
        Ok(Some(attempts)) => info!(attempts, "delivered"),
        Ok(None) => warn!("operation gave up"),
        Err(_) => warn!("timed out waiting for delivery"),
    }
    println!("{}", serde_json::to_string_pretty(&queue.stats().await)?);
    queue.cleanup().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn status_view_omits_stalled() {
        let stats = QueueStats {
            total: 2,
            by_type: BTreeMap::from([("createTask".to_string(), 2)]),
            failed_retries: 1,
            stalled: 1,
        };
        let view = status_view(&stats).unwrap();
        assert_eq!(view["total"], 2);
        assert_eq!(view["failed_retries"], 1);
        assert_eq!(view["by_type"]["createTask"], 2);
        assert!(view.get("stalled").is_none());
    }

    #[test]
    fn demo_attempts_do_not_overflow() {
        assert_eq!(demo_max_attempts(1), 2);
        assert_eq!(demo_max_attempts(u32::MAX), u32::MAX);
    }
}
