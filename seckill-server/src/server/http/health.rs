//! 運用API: GET /health
//!
//! プロセスが担当する層のカウンタだけを返す（担当外は null）。

use axum::{extract::State, Json};
use seckill_core::{EngineMetrics, LatencyStats};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::back::order_sink::SinkMetrics;
use crate::back::worker::WorkerMetrics;
use crate::back::{EngineWorker, OrderSink};
use crate::front::router::RouterMetrics;
use crate::front::service::FrontMetrics;
use crate::front::{CorrelationRegistry, LoggingSeckill, ResultRouter, SeckillService};
use crate::queue::{QueueSet, WorkQueue};

/// /health の集計元
pub struct HealthProbe {
    role: &'static str,
    queues: QueueSet,
    front: Option<(Arc<LoggingSeckill<SeckillService>>, Arc<CorrelationRegistry>)>,
    router: Option<Arc<ResultRouter>>,
    worker: Option<Arc<EngineWorker>>,
    sink: Option<Arc<OrderSink>>,
}

impl HealthProbe {
    pub fn new(role: &'static str, queues: QueueSet) -> Self {
        Self {
            role,
            queues,
            front: None,
            router: None,
            worker: None,
            sink: None,
        }
    }

    pub fn with_front(
        mut self,
        service: Arc<LoggingSeckill<SeckillService>>,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        self.front = Some((service, registry));
        self
    }

    pub fn with_router(mut self, router: Arc<ResultRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_worker(mut self, worker: Arc<EngineWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_sink(mut self, sink: Arc<OrderSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn snapshot(&self) -> HealthResponse {
        let front = self.front.as_ref().map(|(svc, registry)| FrontHealth {
            pending: registry.len(),
            metrics: svc.inner().metrics(),
            wait_latency: svc.inner().wait_latency().into(),
        });
        let back = self.worker.as_ref().map(|w| BackHealth {
            worker: w.metrics(),
            engine: w.engine_metrics().into(),
            decision_latency: w.decision_latency().into(),
            sink: self.sink.as_ref().map(|s| s.metrics()),
        });
        HealthResponse {
            status: "OK",
            role: self.role,
            queue_backend: self.queues.backend.kind(),
            queues: QueueDepths {
                requests: depth(self.queues.requests.as_ref()).await,
                results: depth(self.queues.results.as_ref()).await,
                orders: depth(self.queues.orders.as_ref()).await,
            },
            front,
            router: self.router.as_ref().map(|r| r.metrics()),
            back,
        }
    }
}

/// 取れなければ null
async fn depth(queue: &dyn WorkQueue) -> Option<usize> {
    queue.len().await.ok()
}

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    pub status: &'static str,
    pub role: &'static str,
    pub queue_backend: &'static str,
    pub queues: QueueDepths,
    pub front: Option<FrontHealth>,
    pub router: Option<RouterMetrics>,
    pub back: Option<BackHealth>,
}

#[derive(Debug, Serialize)]
pub(super) struct QueueDepths {
    pub requests: Option<usize>,
    pub results: Option<usize>,
    pub orders: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct FrontHealth {
    pub pending: usize,
    pub metrics: FrontMetrics,
    pub wait_latency: LatencyView,
}

#[derive(Debug, Serialize)]
pub(super) struct BackHealth {
    pub worker: WorkerMetrics,
    pub engine: EngineView,
    pub decision_latency: LatencyView,
    pub sink: Option<SinkMetrics>,
}

#[derive(Debug, Serialize)]
pub(super) struct EngineView {
    pub success: u64,
    pub not_found: u64,
    pub sold_out: u64,
    pub already_bought: u64,
}

impl From<EngineMetrics> for EngineView {
    fn from(m: EngineMetrics) -> Self {
        Self {
            success: m.success,
            not_found: m.not_found,
            sold_out: m.sold_out,
            already_bought: m.already_bought,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct LatencyView {
    pub count: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

impl From<LatencyStats> for LatencyView {
    fn from(s: LatencyStats) -> Self {
        Self {
            count: s.count,
            p50_ns: s.p50_nanos,
            p99_ns: s.p99_nanos,
            max_ns: s.max_nanos,
        }
    }
}

/// ヘルスチェック（GET /health）
pub(super) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::service::tests::product;
    use crate::queue::{MemoryBackend, QueueBackend, QueueNames};
    use seckill_core::{LockStrategy, PurchaseRequest, SeckillEngine, StockCatalog, TokenSigner};
    use std::time::Duration;

    #[tokio::test]
    async fn back_only_probe_reports_queue_depths() {
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let queues = QueueSet::open(backend, &QueueNames::default());
        queues.requests.push("x".into()).await.unwrap();

        let probe = HealthProbe::new("back", queues);
        let snap = probe.snapshot().await;
        assert_eq!(snap.status, "OK");
        assert_eq!(snap.queue_backend, "memory");
        assert_eq!(snap.queues.requests, Some(1));
        assert_eq!(snap.queues.orders, Some(0));
        assert!(snap.front.is_none());
        assert!(snap.back.is_none());
    }

    #[tokio::test]
    async fn back_snapshot_reports_engine_counters() {
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let queues = QueueSet::open(backend, &QueueNames::default());
        let catalog = Arc::new(StockCatalog::from_records(vec![product(1, 1, 1)]));
        let engine = Arc::new(SeckillEngine::new(
            catalog,
            TokenSigner::new(b"k").unwrap(),
            LockStrategy::Global,
        ));
        let worker = Arc::new(EngineWorker::new(engine, queues.clone(), Duration::from_secs(30)));

        for user_id in [1, 2] {
            let req = PurchaseRequest::new(1, user_id, "u", "1.1.1.1", 100);
            worker.handle(&serde_json::to_string(&req).unwrap(), 100).await;
        }

        let snap = HealthProbe::new("back", queues).with_worker(worker).snapshot().await;
        let back = snap.back.unwrap();
        assert_eq!((back.engine.success, back.engine.sold_out), (1, 1));
        assert_eq!(back.worker.handled, 2);
        assert_eq!(back.decision_latency.count, 2);
        assert_eq!(snap.queues.orders, Some(1));
        assert!(back.sink.is_none());
    }
}
