//! リクエスト投入と結果待ち
//!
//! 登録 → request キューへ投入 → (返信 | タイマー | 切断) の最初の 1 つで終わる。
//! どの経路でも `PendingSlot` が落ちて登録は外れる。
//! 待機中に future ごと捨てられた場合（HTTP 切断）も closed として数える。

use futures::Future;
use seckill_core::{LatencyHistogram, LatencyStats, PurchaseRequest, PurchaseResult, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::registry::{CorrelationRegistry, RegistryError};
use crate::queue::{push_json, QueueError, WorkQueue};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("timed out waiting for result")]
    Timeout,
    #[error("client closed before result")]
    ClientClosed,
    #[error(transparent)]
    Collision(#[from] RegistryError),
    #[error("enqueue failed: {0}")]
    Enqueue(#[from] QueueError),
    /// スロットが返信なしで外れた
    #[error("reply slot dropped")]
    ReplyDropped,
}

impl SubmitError {
    /// 呼び出し元に返すステータス
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::Timeout,
            Self::ClientClosed => StatusCode::ClientClosed,
            Self::Collision(_) => StatusCode::Retry,
            Self::Enqueue(_) | Self::ReplyDropped => StatusCode::ServiceBusy,
        }
    }
}

#[derive(Debug, Default)]
struct SubmitStats {
    submitted: AtomicU64,
    answered: AtomicU64,
    timeouts: AtomicU64,
    closed: AtomicU64,
    collisions: AtomicU64,
    enqueue_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SubmitMetrics {
    pub submitted: u64,
    pub answered: u64,
    pub timeouts: u64,
    pub closed: u64,
    pub collisions: u64,
    pub enqueue_failed: u64,
}

pub struct Submitter {
    registry: Arc<CorrelationRegistry>,
    requests: Arc<dyn WorkQueue>,
    reply_to: String,
    wait_hist: LatencyHistogram,
    stats: SubmitStats,
}

impl Submitter {
    /// `reply_to` はバック層が結果を返すキュー名
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        requests: Arc<dyn WorkQueue>,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            requests,
            reply_to: reply_to.into(),
            wait_hist: LatencyHistogram::new(),
            stats: SubmitStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// 投入して結果を待つ
    ///
    /// `cancel` が先に完了したら ClientClosed。遅れて届いた結果はルーターで捨てられる。
    pub async fn submit<C>(
        &self,
        req: PurchaseRequest,
        timeout: Duration,
        cancel: C,
    ) -> Result<PurchaseResult, SubmitError>
    where
        C: Future<Output = ()>,
    {
        let req = if req.reply_to.is_empty() {
            req.with_reply_to(self.reply_to.clone())
        } else {
            req
        };
        let key = req.correlation_key.clone();

        let (_slot, rx) = match self.registry.register(key.as_str()) {
            Ok(pair) => pair,
            Err(e) => {
                self.stats.collisions.fetch_add(1, Ordering::Relaxed);
                error!(key = %key, error = %e, "duplicate in-flight purchase");
                return Err(e.into());
            }
        };
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = push_json(self.requests.as_ref(), &req).await {
            self.stats.enqueue_failed.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, queue = self.requests.name(), error = %e, "request enqueue failed");
            return Err(e.into());
        }

        let started = tokio::time::Instant::now();
        let mut waiting = WaitGuard {
            stats: &self.stats,
            key: &key,
            armed: true,
        };
        let outcome = tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| SubmitError::ReplyDropped),
            _ = tokio::time::sleep(timeout) => Err(SubmitError::Timeout),
            _ = cancel => Err(SubmitError::ClientClosed),
        };
        waiting.armed = false;
        self.wait_hist.record(started.elapsed().as_nanos() as u64);

        match &outcome {
            Ok(_) => {
                self.stats.answered.fetch_add(1, Ordering::Relaxed);
            }
            Err(SubmitError::Timeout) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, timeout_ms = timeout.as_millis() as u64, "purchase wait timed out");
            }
            Err(SubmitError::ClientClosed) => {
                self.stats.closed.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "client closed while waiting");
            }
            Err(e) => warn!(key = %key, error = %e, "purchase wait failed"),
        }
        outcome
    }

    pub fn metrics(&self) -> SubmitMetrics {
        SubmitMetrics {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            answered: self.stats.answered.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            closed: self.stats.closed.load(Ordering::Relaxed),
            collisions: self.stats.collisions.load(Ordering::Relaxed),
            enqueue_failed: self.stats.enqueue_failed.load(Ordering::Relaxed),
        }
    }

    pub fn wait_latency(&self) -> LatencyStats {
        self.wait_hist.snapshot()
    }
}

/// 待機中に drop されたら切断として数える
struct WaitGuard<'a> {
    stats: &'a SubmitStats,
    key: &'a str,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
            debug!(key = %self.key, "caller dropped while waiting");
        }
    }
}
