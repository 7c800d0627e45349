//! tether CLI - 永続キューの操作と pool バッチの実行
//!
//! - `submit` / `status` / `clear`: キューを offline で開いて操作する
//! - `process`: デモ executor で sweep を 1 回（`--watch` で空になるまで）
//! - `pool`: スタブのメディア処理を WorkerPool で流す

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_core::{
    DurableTaskQueue, Executor, ExecutorError, NewTask, Operation, OperationRegistry, PoolJob,
    QueueEvent, TaskKind, TetherConfig, WorkerPool,
};

#[derive(Parser)]
#[command(name = "tether", about = "Durable task queue and worker pool")]
struct Cli {
    /// TOML config file (TETHER_* env vars override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a task without running it
    Submit {
        /// insert | update | delete | invoke
        #[arg(long)]
        kind: TaskKind,
        /// Table or function name
        #[arg(long)]
        target: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Show queue counts
    Status,
    /// Drop every queued task
    Clear,
    /// Run one sweep with the demo executors
    Process {
        /// Keep sweeping on the configured retry interval until the queue is empty
        #[arg(long)]
        watch: bool,
    },
    /// Run a stub media batch through the worker pool
    Pool {
        #[arg(long, default_value_t = 8)]
        items: usize,
        /// Defaults to the configured pool size
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = TetherConfig::load(cli.config.as_deref()).context("loading config")?;
    init_tracing(&config.log_level);

    match cli.command {
        Command::Submit {
            kind,
            target,
            payload,
            max_attempts,
        } => cmd_submit(&config, kind, target, &payload, max_attempts).await,
        Command::Status => cmd_status(&config).await,
        Command::Clear => cmd_clear(&config).await,
        Command::Process { watch } => cmd_process(&config, watch).await,
        Command::Pool { items, workers } => cmd_pool(&config, items, workers).await,
    }
}

fn init_tracing(fallback: &str) {
    // RUST_LOG が優先、なければ config の log_level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Opens the configured queue. Offline, so nothing runs unless asked.
async fn open_queue(config: &TetherConfig) -> anyhow::Result<DurableTaskQueue> {
    let mut builder = DurableTaskQueue::builder().with_config(config).online(false);
    for kind in TaskKind::ALL {
        builder = builder.executor(kind, DemoExecutor { kind })?;
    }
    let queue = builder
        .build()
        .await
        .with_context(|| format!("opening queue at {}", config.store_path.display()))?;
    Ok(queue)
}

async fn cmd_submit(
    config: &TetherConfig,
    kind: TaskKind,
    target: String,
    payload: &str,
    max_attempts: Option<u32>,
) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    let mut new = NewTask::new(kind, target, payload);
    if let Some(n) = max_attempts {
        new = new.with_max_attempts(n);
    }

    let queue = open_queue(config).await?;
    let id = queue.submit(new).await;
    println!("{id}");
    Ok(())
}

async fn cmd_status(config: &TetherConfig) -> anyhow::Result<()> {
    let queue = open_queue(config).await?;
    let status = queue.status();
    println!(
        "total={} pending={} retrying={} processing={}",
        status.total, status.pending, status.retrying, status.processing
    );
    for task in queue.tasks() {
        println!(
            "  {} {:<6} {} attempts={}/{} created={}",
            task.id,
            task.kind,
            task.target,
            task.attempts,
            task.max_attempts,
            task.created_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn cmd_clear(config: &TetherConfig) -> anyhow::Result<()> {
    let queue = open_queue(config).await?;
    let dropped = queue.status().total;
    queue.clear().await;
    println!("cleared {dropped} task(s)");
    Ok(())
}

async fn cmd_process(config: &TetherConfig, watch: bool) -> anyhow::Result<()> {
    let queue = open_queue(config).await?;
    let mut events = queue.events();
    // unbounded なので読むのが遅くても取りこぼさない
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                QueueEvent::TaskSucceeded { task } => {
                    println!("ok     {} {}", task.id, task.target)
                }
                QueueEvent::TaskFailed { task, error } => {
                    println!("failed {} {}: {error}", task.id, task.target)
                }
            }
        }
    });

    let report = queue.connectivity_restored().await;
    info!(?report, "sweep done");

    if watch && !queue.status().is_idle() {
        let interval = config
            .retry_interval()
            .context("--watch needs retry_interval_ms in config or TETHER_RETRY_INTERVAL_MS")?;
        let timer = queue.spawn_retry_timer(interval);
        while !queue.status().is_idle() {
            tokio::time::sleep(interval).await;
        }
        timer.shutdown_and_join().await;
    }

    let status = queue.status();
    println!("remaining total={} retrying={}", status.total, status.retrying);

    // queue を落とすと sender が閉じ、printer は残りを出し切って終わる
    drop(queue);
    let _ = printer.await;
    Ok(())
}

async fn cmd_pool(
    config: &TetherConfig,
    items: usize,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let mut registry = OperationRegistry::new();
    for (name, delay_ms) in [
        ("frame.process", 40),
        ("quality.validate", 15),
        ("asset.optimize", 25),
    ] {
        registry.register(name, Arc::new(StubStep::new(name, delay_ms)))?;
    }

    let size = workers.unwrap_or_else(|| config.pool_size_or_default());
    let pool =
        WorkerPool::spawn_with_timeout(size, Arc::new(registry), config.execution_timeout());

    let frames: Vec<PoolJob> = (0..items)
        .map(|i| PoolJob::new("frame.process", json!({ "frame": i })))
        .collect();
    let processed = pool.parallel_process(frames).await?;

    let checks: Vec<PoolJob> = processed
        .iter()
        .map(|frame| PoolJob::new("quality.validate", frame.clone()))
        .chain(std::iter::once(PoolJob::new(
            "asset.optimize",
            json!({ "frames": items }),
        )))
        .collect();
    let results = pool.parallel_settle(checks).await;

    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(value) => println!("{i:>3} {value}"),
            Err(e) => println!("{i:>3} error: {e}"),
        }
    }

    info!(workers = pool.size(), busy = pool.busy_workers(), "pool batch finished");
    pool.shutdown_and_join().await;
    Ok(())
}

/// Stand-in for the remote backend. Rejects payloads that are not JSON
/// objects before "sending" anything.
struct DemoExecutor {
    kind: TaskKind,
}

#[async_trait]
impl Executor for DemoExecutor {
    async fn execute(&self, target: &str, payload: &Value) -> Result<Value, ExecutorError> {
        if target.is_empty() {
            return Err(ExecutorError::malformed("empty target"));
        }
        let Some(fields) = payload.as_object() else {
            return Err(ExecutorError::malformed("payload must be a JSON object"));
        };
        let needs_id = matches!(self.kind, TaskKind::Update | TaskKind::Delete);
        if needs_id && !fields.contains_key("id") {
            return Err(ExecutorError::malformed(format!("{} needs an id", self.kind)));
        }
        if fields.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ExecutorError::failed("backend unavailable"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!({ "kind": self.kind, "target": target }))
    }
}

/// Sleeps, then echoes its input tagged with the step name.
struct StubStep {
    name: &'static str,
    delay: Duration,
}

impl StubStep {
    fn new(name: &'static str, delay_ms: u64) -> Self {
        Self {
            name,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl Operation for StubStep {
    async fn run(&self, data: Value) -> Result<Value, String> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "step": self.name, "input": data }))
    }
}
