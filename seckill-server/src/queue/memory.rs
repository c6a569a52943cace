//! プロセス内キュー（単一プロセス構成とテスト用）

use async_trait::async_trait;
use dashmap::DashMap;
use seckill_core::FifoQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{QueueBackend, QueueError, WorkQueue};

pub struct MemoryQueue {
    name: String,
    inner: FifoQueue<String>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: FifoQueue::new(),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: String) -> Result<(), QueueError> {
        self.inner.push(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.inner.pop() {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // push と待機開始の間の取りこぼしは notify の permit で拾う
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.inner.pop());
            }
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.len())
    }
}

/// 名前 → MemoryQueue
#[derive(Default)]
pub struct MemoryBackend {
    queues: DashMap<String, Arc<MemoryQueue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueBackend for MemoryBackend {
    fn open(&self, name: &str) -> Arc<dyn WorkQueue> {
        let queue = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name)))
            .clone();
        queue
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_returns_none_after_wait() {
        let q = MemoryQueue::new("empty");
        let got = q.pop(Duration::from_millis(5)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_push() {
        let q = Arc::new(MemoryQueue::new("wake"));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        q.push("hello".into()).await.unwrap();
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn fifo_order_is_kept() {
        let q = MemoryQueue::new("fifo");
        for i in 0..3 {
            q.push(i.to_string()).await.unwrap();
        }
        assert_eq!(q.len().await.unwrap(), 3);
        for i in 0..3 {
            let got = q.pop(Duration::ZERO).await.unwrap();
            assert_eq!(got, Some(i.to_string()));
        }
    }
}
