use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use tether_core::pool::WorkerSlot;
use tether_core::{Operation, OperationRegistry, PoolError, PoolJob, WorkerPool};

/// Sleeps `ms` and logs start/end, returning `name`.
struct Timed {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Operation for Timed {
    async fn run(&self, data: serde_json::Value) -> Result<serde_json::Value, String> {
        let name = data["name"].as_str().unwrap_or("?").to_string();
        let ms = data["ms"].as_u64().unwrap_or(0);
        self.log.lock().unwrap().push(format!("start:{name}"));
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.log.lock().unwrap().push(format!("end:{name}"));
        if data["fail"].as_bool().unwrap_or(false) {
            return Err(format!("{name} rejected"));
        }
        Ok(json!(name))
    }
}

/// Tracks how many runs overlap.
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Operation for Concurrency {
    async fn run(&self, _data: serde_json::Value) -> Result<serde_json::Value, String> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!(null))
    }
}

struct Forever;

#[async_trait]
impl Operation for Forever {
    async fn run(&self, _data: serde_json::Value) -> Result<serde_json::Value, String> {
        std::future::pending().await
    }
}

fn timed_pool(size: usize) -> (WorkerPool, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut reg = OperationRegistry::new();
    reg.register("frame.process", Arc::new(Timed { log: log.clone() }))
        .unwrap();
    reg.register("forever", Arc::new(Forever)).unwrap();
    (WorkerPool::spawn(size, Arc::new(reg)), log)
}

fn job(name: &str, ms: u64) -> PoolJob {
    PoolJob::new("frame.process", json!({ "name": name, "ms": ms }))
}

#[tokio::test(start_paused = true)]
async fn single_worker_runs_jobs_strictly_in_order() {
    let (pool, log) = timed_pool(1);

    let results = pool
        .parallel_process(vec![job("T1", 100), job("T2", 10)])
        .await
        .unwrap();

    assert_eq!(results, vec![json!("T1"), json!("T2")]);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start:T1", "end:T1", "start:T2", "end:T2"]
    );
}

#[tokio::test(start_paused = true)]
async fn two_workers_overlap_but_results_keep_input_order() {
    let (pool, log) = timed_pool(2);

    let results = pool
        .parallel_process(vec![job("T1", 100), job("T2", 10)])
        .await
        .unwrap();

    // T2 finishes first, yet index 0 is still T1
    assert_eq!(results, vec![json!("T1"), json!("T2")]);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start:T1", "start:T2", "end:T2", "end:T1"]
    );
}

#[tokio::test(start_paused = true)]
async fn never_more_than_n_jobs_in_flight() {
    let op = Arc::new(Concurrency {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut reg = OperationRegistry::new();
    reg.register("quality.validate", op.clone()).unwrap();
    let pool = WorkerPool::spawn(3, Arc::new(reg));

    let jobs = (0..10)
        .map(|i| PoolJob::new("quality.validate", json!({ "item": i })))
        .collect();
    let results = pool.parallel_process(jobs).await.unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(op.peak.load(Ordering::SeqCst), 3);
    assert_eq!(pool.busy_workers(), 0);
}

#[tokio::test(start_paused = true)]
async fn parallel_process_rejects_with_the_failing_job() {
    let (pool, _log) = timed_pool(2);
    let failing = PoolJob::new("frame.process", json!({ "name": "bad", "ms": 5, "fail": true }));

    let err = pool
        .parallel_process(vec![job("ok", 50), failing])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PoolError::Operation {
            operation: "frame.process".to_string(),
            message: "bad rejected".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn parallel_settle_keeps_every_outcome_in_order() {
    let (pool, _log) = timed_pool(2);
    let jobs = vec![
        job("a", 30),
        PoolJob::new("asset.optimize", json!({})),
        job("c", 10),
    ];

    let results = pool.parallel_settle(jobs).await;

    assert_eq!(results[0], Ok(json!("a")));
    assert_eq!(
        results[1],
        Err(PoolError::UnknownOperation("asset.optimize".to_string()))
    );
    assert_eq!(results[2], Ok(json!("c")));
}

#[tokio::test]
async fn terminate_abandons_in_flight_and_queued_jobs() {
    let (pool, _log) = timed_pool(1);
    let pool = Arc::new(pool);

    let in_flight = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.execute(PoolJob::new("forever", json!(null))).await }
    });
    let queued = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.execute(job("never", 0)).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(pool.slots()[0], WorkerSlot::Busy(_)) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    pool.terminate();

    let in_flight = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .unwrap()
        .unwrap();
    let queued = tokio::time::timeout(Duration::from_secs(5), queued)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(in_flight, Err(PoolError::Terminated));
    assert_eq!(queued, Err(PoolError::Terminated));
}

#[tokio::test(start_paused = true)]
async fn job_timeout_frees_the_worker() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut reg = OperationRegistry::new();
    reg.register("forever", Arc::new(Forever)).unwrap();
    reg.register("frame.process", Arc::new(Timed { log })).unwrap();
    let pool = WorkerPool::spawn_with_timeout(1, Arc::new(reg), Some(Duration::from_secs(1)));

    let stuck = pool.execute(PoolJob::new("forever", json!(null))).await;
    let next = pool.execute(job("after", 0)).await;

    assert_eq!(stuck, Err(PoolError::Timeout(Duration::from_secs(1))));
    assert_eq!(next, Ok(json!("after")));
}
