//! Result Router
//!
//! result キューを読み、相関キーで待ち手に配る。
//! 待ち手がいない（タイムアウト済み・切断済み）のは正常系なので debug ログのみ。

use seckill_core::PurchaseResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::CorrelationRegistry;
use crate::queue::WorkQueue;

const POLL_WAIT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// 待ち手なし
    Missed,
    Malformed,
}

#[derive(Debug, Default)]
struct RouterStats {
    delivered: AtomicU64,
    missed: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RouterMetrics {
    pub delivered: u64,
    pub missed: u64,
    pub malformed: u64,
}

pub struct ResultRouter {
    registry: Arc<CorrelationRegistry>,
    results: Arc<dyn WorkQueue>,
    stats: RouterStats,
}

impl ResultRouter {
    pub fn new(registry: Arc<CorrelationRegistry>, results: Arc<dyn WorkQueue>) -> Self {
        Self {
            registry,
            results,
            stats: RouterStats::default(),
        }
    }

    /// 1 件配る
    pub fn route(&self, raw: &str) -> RouteOutcome {
        let result: PurchaseResult = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "undecodable purchase result dropped");
                return RouteOutcome::Malformed;
            }
        };
        let key = result.correlation_key();
        if self.registry.deliver(result) {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::Delivered
        } else {
            self.stats.missed.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "no waiter for result");
            RouteOutcome::Missed
        }
    }

    /// worker を `workers` 本起動する
    pub fn spawn(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        info!(workers, queue = self.results.name(), "result router started");
        (0..workers.max(1))
            .map(|worker_id| {
                let router = Arc::clone(self);
                tokio::spawn(async move { router.run(worker_id).await })
            })
            .collect()
    }

    async fn run(&self, worker_id: usize) {
        loop {
            match self.results.pop(POLL_WAIT).await {
                Ok(Some(raw)) => {
                    self.route(&raw);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id, error = %e, "result queue pop failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            missed: self.stats.missed.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{push_json, MemoryQueue};
    use seckill_core::StatusCode;

    fn router() -> (Arc<ResultRouter>, Arc<MemoryQueue>, Arc<CorrelationRegistry>) {
        let queue = Arc::new(MemoryQueue::new("results"));
        let registry = Arc::new(CorrelationRegistry::new());
        let results: Arc<dyn WorkQueue> = queue.clone();
        (
            Arc::new(ResultRouter::new(Arc::clone(&registry), results)),
            queue,
            registry,
        )
    }

    #[test]
    fn route_outcomes() {
        let (router, _queue, registry) = router();
        let (_slot, _rx) = registry.register("1_2").unwrap();

        let hit = serde_json::to_string(&PurchaseResult::new(2, 1, StatusCode::SoldOut)).unwrap();
        assert_eq!(router.route(&hit), RouteOutcome::Delivered);
        assert_eq!(router.route(&hit), RouteOutcome::Missed);
        assert_eq!(router.route("{not json"), RouteOutcome::Malformed);

        let m = router.metrics();
        assert_eq!((m.delivered, m.missed, m.malformed), (1, 1, 1));
    }

    #[tokio::test]
    async fn workers_deliver_from_queue() {
        let (router, queue, registry) = router();
        let (_slot, rx) = registry.register("9_9").unwrap();
        let handles = router.spawn(2);

        let result = PurchaseResult::success(9, 9, "tok".into(), 55);
        push_json(queue.as_ref(), &result).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, result);

        for h in handles {
            h.abort();
        }
    }
}
