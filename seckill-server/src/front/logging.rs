//! 呼び出しログのデコレータ
//!
//! `Seckill` 実装を包み、各呼び出しの結果と所要時間を tracing に出す。

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

use super::service::{CloseSignal, ProductInfo, PurchaseCall, PurchaseReply, Seckill};

pub struct LoggingSeckill<S> {
    inner: S,
}

impl<S: Seckill> LoggingSeckill<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Seckill> Seckill for LoggingSeckill<S> {
    fn info(&self, product_id: u64) -> Option<ProductInfo> {
        let started = Instant::now();
        let info = self.inner.info(product_id);
        debug!(
            product_id,
            found = info.is_some(),
            took_us = started.elapsed().as_micros() as u64,
            "sec info"
        );
        info
    }

    fn info_list(&self) -> Vec<ProductInfo> {
        let started = Instant::now();
        let list = self.inner.info_list();
        debug!(
            count = list.len(),
            took_us = started.elapsed().as_micros() as u64,
            "sec info list"
        );
        list
    }

    async fn purchase(&self, call: PurchaseCall, closed: CloseSignal) -> PurchaseReply {
        let started = Instant::now();
        let (user_id, product_id) = (call.user_id, call.product_id);
        let client_addr = call.client_addr.clone();
        let reply = self.inner.purchase(call, closed).await;
        info!(
            user_id,
            product_id,
            client_addr = %client_addr,
            status = %reply.result.status,
            reason = reply.reason.unwrap_or(""),
            took_us = started.elapsed().as_micros() as u64,
            "sec kill"
        );
        reply
    }
}
