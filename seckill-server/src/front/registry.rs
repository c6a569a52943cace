//! Correlation Registry
//!
//! 相関キー（`"{user_id}_{product_id}"`）→ 使い捨ての返信スロット。
//! - 同じキーの待機は同時に 1 つだけ（2 つ目は Collision）
//! - 待機が終わったら必ず外す。`PendingSlot` の Drop で外すので、
//!   呼び出し側の future が途中で捨てられても残らない
//! - 結果の配送はノンブロッキング。待ち手がいなければ捨てる

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use seckill_core::PurchaseResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("correlation key already registered: {0}")]
    Collision(String),
}

struct Slot {
    id: u64,
    tx: oneshot::Sender<PurchaseResult>,
}

#[derive(Default)]
pub struct CorrelationRegistry {
    slots: DashMap<String, Slot>,
    next_id: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返信スロットを登録する
    pub fn register(
        self: &Arc<Self>,
        key: impl Into<String>,
    ) -> Result<(PendingSlot, oneshot::Receiver<PurchaseResult>), RegistryError> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::Collision(key)),
            Entry::Vacant(v) => {
                v.insert(Slot { id, tx });
            }
        }
        let guard = PendingSlot {
            registry: Arc::clone(self),
            key,
            id,
        };
        Ok((guard, rx))
    }

    /// 結果を待ち手に渡す。待ち手がいなければ false
    pub fn deliver(&self, result: PurchaseResult) -> bool {
        let key = result.correlation_key();
        match self.slots.remove(&key) {
            Some((_, slot)) => slot.tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 自分が登録したスロットだけ外す（同じキーで再登録された後続は残す）
    fn release(&self, key: &str, id: u64) {
        self.slots.remove_if(key, |_, slot| slot.id == id);
    }
}

/// 登録中スロットのガード。Drop で登録を外す
pub struct PendingSlot {
    registry: Arc<CorrelationRegistry>,
    key: String,
    id: u64,
}

impl PendingSlot {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seckill_core::StatusCode;

    #[test]
    fn second_registration_collides() {
        let registry = Arc::new(CorrelationRegistry::new());
        let (_slot, _rx) = registry.register("1_2").unwrap();
        let err = registry.register("1_2").err();
        assert_eq!(err, Some(RegistryError::Collision("1_2".into())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn drop_releases_slot() {
        let registry = Arc::new(CorrelationRegistry::new());
        {
            let (slot, _rx) = registry.register("7_1").unwrap();
            assert_eq!(slot.key(), "7_1");
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
        assert!(registry.register("7_1").is_ok());
    }

    #[tokio::test]
    async fn deliver_reaches_waiter() {
        let registry = Arc::new(CorrelationRegistry::new());
        let (_slot, rx) = registry.register("5_9").unwrap();

        assert!(registry.deliver(PurchaseResult::new(9, 5, StatusCode::SoldOut)));
        let got = rx.await.unwrap();
        assert_eq!(got.status, StatusCode::SoldOut);
        assert!(registry.is_empty());
    }

    #[test]
    fn deliver_without_waiter_is_dropped() {
        let registry = Arc::new(CorrelationRegistry::new());
        assert!(!registry.deliver(PurchaseResult::new(1, 1, StatusCode::Success)));

        // 受信側が先に捨てられていても panic しない
        let (_slot, rx) = registry.register("1_1").unwrap();
        drop(rx);
        assert!(!registry.deliver(PurchaseResult::new(1, 1, StatusCode::Success)));
    }

    #[test]
    fn stale_guard_does_not_remove_successor() {
        let registry = Arc::new(CorrelationRegistry::new());
        let (first, _rx1) = registry.register("3_3").unwrap();
        // 配送で先に外れた後、同じキーで次の待機が入る
        registry.deliver(PurchaseResult::new(3, 3, StatusCode::Success));
        let (_second, _rx2) = registry.register("3_3").unwrap();

        drop(first);
        assert_eq!(registry.len(), 1);
    }
}
