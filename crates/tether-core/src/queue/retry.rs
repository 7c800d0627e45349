//! RetryTimer - オプトインの定期 retry
//!
//! デフォルトでは失敗したタスクは次の sweep（再接続か手動呼び出し）でしか再実行しない。
//! `RetryTimer` は一定間隔の sweep を追加する。offline 中とキューが空のときは tick を飛ばす。

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::durable::DurableTaskQueue;

/// Handle to a running retry timer. Dropping it stops the timer after the
/// current sweep (if any) finishes.
pub struct RetryTimer {
    shutdown_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl RetryTimer {
    pub(crate) fn spawn(queue: DurableTaskQueue, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval の最初の tick は即時なので捨てる
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !queue.is_online() || queue.status().total == 0 {
                            continue;
                        }
                        let report = queue.process_queue().await;
                        debug!(?report, "periodic retry sweep");
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            join: Some(join),
        }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the timer task may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(mut self) {
        self.request_shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}
