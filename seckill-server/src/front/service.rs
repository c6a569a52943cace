//! フロント層サービス
//!
//! 購入の流れ: 入場判定 → 商品の事前チェック → 登録して投入 → 結果待ち。
//! 入場判定と事前チェックで落ちたものはキューに載らない。

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;
use seckill_core::{
    unix_now, AdmissionGate, DenyReason, LatencyStats, ProductRecord, ProductStatus,
    PurchaseRequest, PurchaseResult, StatusCode, StockCatalog,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::submit::{SubmitMetrics, Submitter};

/// buy_rate にかける係数（事前チェックは緩めに通す）
const BUY_RATE_SLACK: f64 = 1.5;

/// 呼び出し元の切断通知
pub type CloseSignal = BoxFuture<'static, ()>;

/// 認証済みの購入呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCall {
    pub product_id: u64,
    pub user_id: u64,
    pub username: String,
    pub client_addr: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReply {
    #[serde(flatten)]
    pub result: PurchaseResult,
    /// 入場拒否の理由（拒否時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl PurchaseReply {
    fn status(call: &PurchaseCall, status: StatusCode) -> Self {
        Self {
            result: PurchaseResult::new(call.product_id, call.user_id, status),
            reason: None,
        }
    }

    fn denied(call: &PurchaseCall, reason: DenyReason) -> Self {
        Self {
            result: PurchaseResult::new(call.product_id, call.user_id, StatusCode::ServiceBusy),
            reason: Some(reason.as_str()),
        }
    }
}

/// 商品の公開情報
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInfo {
    pub product_id: u64,
    pub product_name: String,
    pub activity_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub activity_price: u64,
    pub total: u32,
    pub left_num: u32,
    pub status: ProductStatus,
    pub started: bool,
    pub ended: bool,
}

impl ProductInfo {
    fn from_record(p: ProductRecord, now: i64) -> Self {
        Self {
            started: !p.not_started(now),
            ended: p.ended(now),
            product_id: p.product_id,
            product_name: p.product_name,
            activity_name: p.activity_name,
            start_time: p.start_time,
            end_time: p.end_time,
            activity_price: p.activity_price,
            total: p.total,
            left_num: p.left_num,
            status: p.status,
        }
    }
}

#[async_trait]
pub trait Seckill: Send + Sync {
    fn info(&self, product_id: u64) -> Option<ProductInfo>;

    fn info_list(&self) -> Vec<ProductInfo>;

    async fn purchase(&self, call: PurchaseCall, closed: CloseSignal) -> PurchaseReply;
}

/// 事前チェック。`draw` は [0, 1) の乱数
pub fn precheck(product: Option<&ProductRecord>, now: i64, draw: f64) -> Result<(), StatusCode> {
    let Some(p) = product else {
        return Err(StatusCode::NotFound);
    };
    if p.status == ProductStatus::Disabled {
        return Err(StatusCode::NotFound);
    }
    if p.ended(now) {
        return Err(StatusCode::Ended);
    }
    if p.not_started(now) {
        return Err(StatusCode::NotStarted);
    }
    if p.is_sold_out() {
        return Err(StatusCode::SoldOut);
    }
    if draw > p.buy_rate * BUY_RATE_SLACK {
        return Err(StatusCode::Retry);
    }
    Ok(())
}

#[derive(Debug, Default)]
struct FrontStats {
    denied: AtomicU64,
    prechecked_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FrontMetrics {
    pub denied: u64,
    pub prechecked_out: u64,
    pub submit: SubmitMetrics,
}

pub struct SeckillService {
    catalog: Arc<StockCatalog>,
    gate: Arc<AdmissionGate>,
    submitter: Arc<Submitter>,
    wait_timeout: Duration,
    stats: FrontStats,
}

impl SeckillService {
    pub fn new(
        catalog: Arc<StockCatalog>,
        gate: Arc<AdmissionGate>,
        submitter: Arc<Submitter>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            gate,
            submitter,
            wait_timeout,
            stats: FrontStats::default(),
        }
    }

    pub fn metrics(&self) -> FrontMetrics {
        FrontMetrics {
            denied: self.stats.denied.load(Ordering::Relaxed),
            prechecked_out: self.stats.prechecked_out.load(Ordering::Relaxed),
            submit: self.submitter.metrics(),
        }
    }

    pub fn wait_latency(&self) -> LatencyStats {
        self.submitter.wait_latency()
    }
}

#[async_trait]
impl Seckill for SeckillService {
    fn info(&self, product_id: u64) -> Option<ProductInfo> {
        let now = unix_now();
        self.catalog
            .get(product_id)
            .filter(|p| p.status != ProductStatus::Disabled)
            .map(|p| ProductInfo::from_record(p, now))
    }

    fn info_list(&self) -> Vec<ProductInfo> {
        let now = unix_now();
        self.catalog
            .snapshot()
            .into_iter()
            .filter(|p| p.status != ProductStatus::Disabled)
            .map(|p| ProductInfo::from_record(p, now))
            .collect()
    }

    async fn purchase(&self, call: PurchaseCall, closed: CloseSignal) -> PurchaseReply {
        let now = unix_now();

        if let Err(reason) = self.gate.admit(call.user_id, &call.client_addr, now) {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            return PurchaseReply::denied(&call, reason);
        }

        let draw: f64 = rand::thread_rng().gen();
        if let Err(status) = precheck(self.catalog.get(call.product_id).as_ref(), now, draw) {
            self.stats.prechecked_out.fetch_add(1, Ordering::Relaxed);
            return PurchaseReply::status(&call, status);
        }

        let req = PurchaseRequest::new(
            call.product_id,
            call.user_id,
            call.username.clone(),
            call.client_addr.clone(),
            now,
        )
        .with_access_token(call.access_token.clone());

        match self.submitter.submit(req, self.wait_timeout, closed).await {
            Ok(result) => PurchaseReply {
                result,
                reason: None,
            },
            Err(e) => PurchaseReply::status(&call, e.status()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::front::registry::CorrelationRegistry;
    use crate::queue::{MemoryQueue, WorkQueue};
    use futures::FutureExt;
    use seckill_core::AccessLimits;

    pub(crate) fn product(product_id: u64, total: u32, cap: u32) -> ProductRecord {
        ProductRecord {
            product_id,
            product_name: format!("product-{product_id}"),
            activity_name: "flash".into(),
            start_time: 0,
            end_time: i64::MAX,
            activity_price: 100,
            total,
            left_num: total,
            max_buy_per_person: cap,
            buy_rate: 1.0,
            status: ProductStatus::OnSale,
        }
    }

    pub(crate) fn call(user_id: u64, product_id: u64) -> PurchaseCall {
        PurchaseCall {
            product_id,
            user_id,
            username: format!("user-{user_id}"),
            client_addr: "10.0.0.1".into(),
            access_token: String::new(),
        }
    }

    fn service(records: Vec<ProductRecord>) -> (SeckillService, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new("requests"));
        let requests: Arc<dyn WorkQueue> = queue.clone();
        let submitter = Arc::new(Submitter::new(
            Arc::new(CorrelationRegistry::new()),
            requests,
            "results",
        ));
        let limits = AccessLimits {
            user_per_sec: 100,
            user_per_min: 1_000,
            addr_per_sec: 100,
            addr_per_min: 1_000,
        };
        let svc = SeckillService::new(
            Arc::new(StockCatalog::from_records(records)),
            Arc::new(AdmissionGate::new(limits)),
            submitter,
            Duration::from_millis(50),
        );
        (svc, queue)
    }

    #[test]
    fn precheck_order() {
        let now = 1_000;
        assert_eq!(precheck(None, now, 0.0), Err(StatusCode::NotFound));

        let mut p = product(1, 5, 1);
        p.start_time = 2_000;
        assert_eq!(precheck(Some(&p), now, 0.0), Err(StatusCode::NotStarted));

        p.start_time = 0;
        p.end_time = 500;
        assert_eq!(precheck(Some(&p), now, 0.0), Err(StatusCode::Ended));

        p.end_time = i64::MAX;
        p.status = ProductStatus::SoldOut;
        assert_eq!(precheck(Some(&p), now, 0.0), Err(StatusCode::SoldOut));

        p.status = ProductStatus::OnSale;
        p.buy_rate = 0.5;
        assert_eq!(precheck(Some(&p), now, 0.8), Err(StatusCode::Retry));
        assert_eq!(precheck(Some(&p), now, 0.7), Ok(()));

        p.status = ProductStatus::Disabled;
        assert_eq!(precheck(Some(&p), now, 0.0), Err(StatusCode::NotFound));
    }

    #[tokio::test]
    async fn unknown_product_is_not_found_without_enqueue() {
        let (svc, queue) = service(vec![]);
        let reply = svc.purchase(call(1, 42), futures::future::pending().boxed()).await;
        assert_eq!(reply.result.status, StatusCode::NotFound);
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(svc.metrics().prechecked_out, 1);
    }

    #[tokio::test]
    async fn blacklisted_user_is_denied_with_reason() {
        let (svc, queue) = service(vec![product(1, 5, 1)]);
        svc.gate.block_user(7);
        let reply = svc.purchase(call(7, 1), futures::future::pending().boxed()).await;
        assert_eq!(reply.result.status, StatusCode::ServiceBusy);
        assert_eq!(reply.reason, Some("user_blacklisted"));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_back_tier_times_out() {
        let (svc, queue) = service(vec![product(1, 5, 1)]);
        let reply = svc.purchase(call(3, 1), futures::future::pending().boxed()).await;
        assert_eq!(reply.result.status, StatusCode::Timeout);
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(svc.metrics().submit.timeouts, 1);
    }

    #[test]
    fn info_hides_disabled_products() {
        let mut hidden = product(2, 1, 1);
        hidden.status = ProductStatus::Disabled;
        let (svc, _queue) = service(vec![product(1, 5, 1), hidden]);

        let info = svc.info(1).unwrap();
        assert!(info.started);
        assert!(!info.ended);
        assert_eq!(info.left_num, 5);
        assert!(svc.info(2).is_none());
        assert_eq!(svc.info_list().len(), 1);
    }
}
