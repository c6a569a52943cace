//! Seckill engine: the stock-decrement critical section.
//!
//! 判定順序（最初に決まったもので返す）:
//! 1. 商品なし → not-found
//! 2. SoldOut → sold-out
//! 3. 購入履歴 >= 1 人あたり上限 → already-bought
//! 4. 残数 0 → SoldOut にして sold-out
//! 5. 残数 -1 / 履歴 +1（4 と同じロック内）
//! 6. 注文を生成
//! 7. トークンを署名して success
//!
//! ロックは既定で全商品共通の 1 本。`LockStrategy::Striped` で
//! `product_id % stripes` のストライプロックに切り替えられる（商品内の直列性は維持）。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::{ProductStatus, StockCatalog};
use crate::metrics::{LatencyGuard, LatencyHistogram};
use crate::model::{Order, PurchaseRequest, PurchaseResult, StatusCode};
use crate::token::TokenSigner;

/// クリティカルセクションのロック粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// 全商品で 1 本
    Global,
    /// product_id % n のストライプ
    Striped(usize),
}

impl LockStrategy {
    fn stripes(self) -> usize {
        match self {
            Self::Global => 1,
            Self::Striped(n) => n.max(1),
        }
    }
}

/// ユーザーごとの購入履歴（user_id → product_id → 数量）
///
/// 単調増加。リセットはプロセス再起動のみ。
#[derive(Debug, Default)]
pub struct PurchaseHistory {
    by_user: Mutex<HashMap<u64, HashMap<u64, u32>>>,
}

impl PurchaseHistory {
    pub fn count(&self, user_id: u64, product_id: u64) -> u32 {
        self.by_user
            .lock()
            .get(&user_id)
            .and_then(|h| h.get(&product_id).copied())
            .unwrap_or(0)
    }

    pub fn add(&self, user_id: u64, product_id: u64, n: u32) -> u32 {
        let mut guard = self.by_user.lock();
        let slot = guard
            .entry(user_id)
            .or_insert_with(|| HashMap::with_capacity(16))
            .entry(product_id)
            .or_insert(0);
        *slot = slot.saturating_add(n);
        *slot
    }

    pub fn users(&self) -> usize {
        self.by_user.lock().len()
    }
}

/// 1 件の判定結果。成功時のみ注文を伴う
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub result: PurchaseResult,
    pub order: Option<Order>,
}

impl Decision {
    fn reject(req: &PurchaseRequest, status: StatusCode) -> Self {
        Self {
            result: PurchaseResult::new(req.product_id, req.user_id, status),
            order: None,
        }
    }
}

#[derive(Debug, Default)]
struct EngineStats {
    success: AtomicU64,
    not_found: AtomicU64,
    sold_out: AtomicU64,
    already_bought: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics {
    pub success: u64,
    pub not_found: u64,
    pub sold_out: u64,
    pub already_bought: u64,
}

pub struct SeckillEngine {
    catalog: Arc<StockCatalog>,
    history: PurchaseHistory,
    locks: Box<[Mutex<()>]>,
    signer: TokenSigner,
    decision_hist: LatencyHistogram,
    stats: EngineStats,
}

impl SeckillEngine {
    pub fn new(catalog: Arc<StockCatalog>, signer: TokenSigner, strategy: LockStrategy) -> Self {
        let locks = (0..strategy.stripes()).map(|_| Mutex::new(())).collect();
        Self {
            catalog,
            history: PurchaseHistory::default(),
            locks,
            signer,
            decision_hist: LatencyHistogram::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn catalog(&self) -> &Arc<StockCatalog> {
        &self.catalog
    }

    pub fn history(&self) -> &PurchaseHistory {
        &self.history
    }

    pub fn stripes(&self) -> usize {
        self.locks.len()
    }

    /// 現在時刻で判定
    pub fn process(&self, req: &PurchaseRequest) -> Decision {
        self.process_at(req, unix_now())
    }

    /// `now`（unix 秒）をトークン時刻として判定
    pub fn process_at(&self, req: &PurchaseRequest, now: i64) -> Decision {
        let _latency = LatencyGuard::new(&self.decision_hist);
        let decision = self.decide(req, now);
        self.count(decision.result.status);
        decision
    }

    fn decide(&self, req: &PurchaseRequest, now: i64) -> Decision {
        let _critical = self.lock_for(req.product_id).lock();

        let Some(product) = self.catalog.get(req.product_id) else {
            return Decision::reject(req, StatusCode::NotFound);
        };
        match product.status {
            ProductStatus::SoldOut => return Decision::reject(req, StatusCode::SoldOut),
            ProductStatus::Disabled => return Decision::reject(req, StatusCode::NotFound),
            ProductStatus::OnSale => {}
        }

        if self.history.count(req.user_id, req.product_id) >= product.max_buy_per_person {
            return Decision::reject(req, StatusCode::AlreadyBought);
        }

        // check-then-act はこの経路だけ
        let decremented = self.catalog.with_product_mut(req.product_id, |p| {
            if p.left_num == 0 {
                p.status = ProductStatus::SoldOut;
                return false;
            }
            p.left_num -= 1;
            if p.left_num == 0 {
                p.status = ProductStatus::SoldOut;
            }
            true
        });
        match decremented {
            // ロック取得後にリフレッシュで消えた
            None => return Decision::reject(req, StatusCode::NotFound),
            Some(false) => return Decision::reject(req, StatusCode::SoldOut),
            Some(true) => {}
        }
        self.history.add(req.user_id, req.product_id, 1);

        let order = Order {
            product_id: product.product_id,
            product_name: product.product_name,
            user_id: req.user_id,
            buyer: req.username.clone(),
            price: product.activity_price,
            order_time: now,
        };
        let token = self.signer.sign(req.user_id, req.product_id, now);
        Decision {
            result: PurchaseResult::success(req.product_id, req.user_id, token, now),
            order: Some(order),
        }
    }

    #[inline]
    fn lock_for(&self, product_id: u64) -> &Mutex<()> {
        let idx = (product_id % self.locks.len() as u64) as usize;
        &self.locks[idx]
    }

    fn count(&self, status: StatusCode) {
        let counter = match status {
            StatusCode::Success => &self.stats.success,
            StatusCode::NotFound => &self.stats.not_found,
            StatusCode::SoldOut => &self.stats.sold_out,
            StatusCode::AlreadyBought => &self.stats.already_bought,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            success: self.stats.success.load(Ordering::Relaxed),
            not_found: self.stats.not_found.load(Ordering::Relaxed),
            sold_out: self.stats.sold_out.load(Ordering::Relaxed),
            already_bought: self.stats.already_bought.load(Ordering::Relaxed),
        }
    }

    pub fn decision_latency(&self) -> &LatencyHistogram {
        &self.decision_hist
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
