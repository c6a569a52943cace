//! エンジン worker
//!
//! request キューを読み、エンジンで判定し、結果を返信先キューへ、
//! 成約時は注文を order キューへ積む。
//! - デコードできないリクエストは service-busy を返す（ID が読めた場合のみ）
//! - 受付から `max_request_age` を過ぎたものは判定せず捨てる（呼び出し元はもう待っていない）

use seckill_core::{
    unix_now, EngineMetrics, LatencyStats, PurchaseRequest, PurchaseResult, SeckillEngine, StatusCode,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::{push_json, QueueSet};

const POLL_WAIT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// 1 件の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Decided(StatusCode),
    Stale,
    Malformed,
}

#[derive(Debug, Default)]
struct WorkerStats {
    handled: AtomicU64,
    stale: AtomicU64,
    malformed: AtomicU64,
    reply_failed: AtomicU64,
    order_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerMetrics {
    pub handled: u64,
    pub stale: u64,
    pub malformed: u64,
    pub reply_failed: u64,
    pub order_failed: u64,
}

pub struct EngineWorker {
    engine: Arc<SeckillEngine>,
    queues: QueueSet,
    max_request_age: Duration,
    stats: WorkerStats,
}

impl EngineWorker {
    pub fn new(engine: Arc<SeckillEngine>, queues: QueueSet, max_request_age: Duration) -> Self {
        Self {
            engine,
            queues,
            max_request_age,
            stats: WorkerStats::default(),
        }
    }

    pub fn spawn(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        info!(
            workers,
            queue = self.queues.requests.name(),
            stripes = self.engine.stripes(),
            "engine workers started"
        );
        (0..workers.max(1))
            .map(|worker_id| {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run(worker_id).await })
            })
            .collect()
    }

    async fn run(&self, worker_id: usize) {
        loop {
            match self.queues.requests.pop(POLL_WAIT).await {
                Ok(Some(raw)) => {
                    self.handle(&raw, unix_now()).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id, error = %e, "request queue pop failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// 1 件処理する。`now` は unix 秒
    pub async fn handle(&self, raw: &str, now: i64) -> Handled {
        let req: PurchaseRequest = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "undecodable purchase request");
                self.reply_busy(raw).await;
                return Handled::Malformed;
            }
        };

        let max_age = self.max_request_age.as_secs().max(1) as i64;
        if now - req.access_time > max_age {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            debug!(key = %req.correlation_key, age = now - req.access_time, "stale request dropped");
            return Handled::Stale;
        }

        let decision = self.engine.process_at(&req, now);
        self.stats.handled.fetch_add(1, Ordering::Relaxed);
        let status = decision.result.status;

        let reply = self.queues.reply_queue(&req.reply_to);
        if let Err(e) = push_json(reply.as_ref(), &decision.result).await {
            self.stats.reply_failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = %req.correlation_key, queue = reply.name(), error = %e, "result enqueue failed");
        }
        if let Some(order) = decision.order {
            if let Err(e) = push_json(self.queues.orders.as_ref(), &order).await {
                // 在庫は減っているので注文の取りこぼしは error
                self.stats.order_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    user_id = order.user_id,
                    product_id = order.product_id,
                    error = %e,
                    "order enqueue failed"
                );
            }
        }
        Handled::Decided(status)
    }

    /// 壊れたリクエストでも ID が読めれば service-busy を返す
    async fn reply_busy(&self, raw: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return;
        };
        let (Some(user_id), Some(product_id)) = (
            value.get("user_id").and_then(|v| v.as_u64()),
            value.get("product_id").and_then(|v| v.as_u64()),
        ) else {
            return;
        };
        let reply_to = value.get("reply_to").and_then(|v| v.as_str()).unwrap_or("");
        let reply = self.queues.reply_queue(reply_to);
        let busy = PurchaseResult::new(product_id, user_id, StatusCode::ServiceBusy);
        if let Err(e) = push_json(reply.as_ref(), &busy).await {
            self.stats.reply_failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "busy reply enqueue failed");
        }
    }

    pub fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            handled: self.stats.handled.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            reply_failed: self.stats.reply_failed.load(Ordering::Relaxed),
            order_failed: self.stats.order_failed.load(Ordering::Relaxed),
        }
    }

    pub fn engine_metrics(&self) -> EngineMetrics {
        self.engine.metrics()
    }

    pub fn decision_latency(&self) -> LatencyStats {
        self.engine.decision_latency().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::service::tests::product;
    use crate::queue::{MemoryBackend, QueueBackend, QueueNames, WorkQueue};
    use seckill_core::{LockStrategy, Order, StockCatalog, TokenSigner};

    fn worker(total: u32, cap: u32) -> (EngineWorker, QueueSet) {
        let catalog = Arc::new(StockCatalog::from_records(vec![product(1, total, cap)]));
        let engine = Arc::new(SeckillEngine::new(
            catalog,
            TokenSigner::new(b"k").unwrap(),
            LockStrategy::Global,
        ));
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let queues = QueueSet::open(backend, &QueueNames::default());
        (
            EngineWorker::new(engine, queues.clone(), Duration::from_secs(30)),
            queues,
        )
    }

    fn raw(user_id: u64, product_id: u64, access_time: i64) -> String {
        let req = PurchaseRequest::new(product_id, user_id, "u", "1.1.1.1", access_time);
        serde_json::to_string(&req).unwrap()
    }

    async fn next_result(queue: &dyn WorkQueue) -> PurchaseResult {
        let raw = queue.pop(Duration::ZERO).await.unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn same_user_twice_gets_one_unit() {
        let (worker, queues) = worker(5, 1);

        assert_eq!(
            worker.handle(&raw(7, 1, 100), 100).await,
            Handled::Decided(StatusCode::Success)
        );
        assert_eq!(
            worker.handle(&raw(7, 1, 100), 100).await,
            Handled::Decided(StatusCode::AlreadyBought)
        );

        let first = next_result(queues.results.as_ref()).await;
        assert_eq!(first.status, StatusCode::Success);
        assert!(first.token.is_some());
        let second = next_result(queues.results.as_ref()).await;
        assert_eq!(second.status, StatusCode::AlreadyBought);

        assert_eq!(queues.orders.len().await.unwrap(), 1);
        let order_raw = queues.orders.pop(Duration::ZERO).await.unwrap().unwrap();
        let order: Order = serde_json::from_str(&order_raw).unwrap();
        assert_eq!((order.user_id, order.product_id), (7, 1));
        assert_eq!(worker.engine.catalog().get(1).unwrap().left_num, 4);
    }

    #[tokio::test]
    async fn unknown_product_replies_not_found() {
        let (worker, queues) = worker(1, 1);
        assert_eq!(
            worker.handle(&raw(1, 99, 100), 100).await,
            Handled::Decided(StatusCode::NotFound)
        );
        assert_eq!(next_result(queues.results.as_ref()).await.status, StatusCode::NotFound);
        assert_eq!(queues.orders.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_request_is_dropped_without_decision() {
        let (worker, queues) = worker(1, 1);
        assert_eq!(worker.handle(&raw(1, 1, 100), 200).await, Handled::Stale);
        assert_eq!(queues.results.len().await.unwrap(), 0);
        assert_eq!(worker.engine.catalog().get(1).unwrap().left_num, 1);
        assert_eq!(worker.metrics().stale, 1);
    }

    #[tokio::test]
    async fn malformed_request_with_ids_gets_service_busy() {
        let (worker, queues) = worker(1, 1);
        // access_time が文字列
        let bad = r#"{"user_id":3,"product_id":1,"access_time":"x","correlation_key":"3_1"}"#;
        assert_eq!(worker.handle(bad, 100).await, Handled::Malformed);
        assert_eq!(next_result(queues.results.as_ref()).await.status, StatusCode::ServiceBusy);

        assert_eq!(worker.handle("garbage", 100).await, Handled::Malformed);
        assert_eq!(queues.results.len().await.unwrap(), 0);
        assert_eq!(worker.metrics().malformed, 2);
    }

    #[tokio::test]
    async fn result_goes_to_reply_to_queue() {
        let (worker, queues) = worker(1, 1);
        let req = PurchaseRequest::new(1, 5, "u", "1.1.1.1", 100).with_reply_to("front-b");
        worker.handle(&serde_json::to_string(&req).unwrap(), 100).await;

        assert_eq!(queues.results.len().await.unwrap(), 0);
        let other = queues.backend.open("front-b");
        assert_eq!(next_result(other.as_ref()).await.status, StatusCode::Success);
    }
}
