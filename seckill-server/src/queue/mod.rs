//! Work Queue（フロント層とバック層を切り離す唯一の経路）
//!
//! 名前付き FIFO を 4 本使う:
//! - request   : front → back（購入リクエスト）
//! - result    : back → front（購入結果）
//! - order     : back → order sink（成約注文）
//! - blacklist : 外部 → front（ブラックリスト追加）
//!
//! バックエンドはプロセス内（memory）と Redis list の 2 種類。
//! producer は consumer を待たない。バック層が落ちていればキューに溜まり、
//! 呼び出し元はタイムアウトで返る。

mod memory;
mod redis;

pub use self::memory::MemoryBackend;
#[cfg(test)]
pub use self::memory::MemoryQueue;
pub use self::redis::RedisBackend;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("redis queue error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// 末尾に追加する。consumer の有無では待たない
    async fn push(&self, payload: String) -> Result<(), QueueError>;

    /// 先頭を取り出す。空なら最大 `wait` だけ待って `None`
    async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;
}

/// JSON にして push する
pub async fn push_json<T: Serialize + ?Sized>(
    queue: &dyn WorkQueue,
    value: &T,
) -> Result<(), QueueError> {
    let payload = serde_json::to_string(value)?;
    queue.push(payload).await
}

/// 名前からキューを開く
pub trait QueueBackend: Send + Sync {
    fn open(&self, name: &str) -> Arc<dyn WorkQueue>;
    fn kind(&self) -> &'static str;
}

/// プロセスが使うキュー一式
#[derive(Clone)]
pub struct QueueSet {
    pub backend: Arc<dyn QueueBackend>,
    pub requests: Arc<dyn WorkQueue>,
    pub results: Arc<dyn WorkQueue>,
    pub orders: Arc<dyn WorkQueue>,
    pub blacklist: Arc<dyn WorkQueue>,
}

impl QueueSet {
    pub fn open(backend: Arc<dyn QueueBackend>, names: &QueueNames) -> Self {
        Self {
            requests: backend.open(&names.requests),
            results: backend.open(&names.results),
            orders: backend.open(&names.orders),
            blacklist: backend.open(&names.blacklist),
            backend,
        }
    }

    /// 返信先キューを解決する（空なら既定の result キュー）
    pub fn reply_queue(&self, reply_to: &str) -> Arc<dyn WorkQueue> {
        if reply_to.is_empty() || reply_to == self.results.name() {
            return Arc::clone(&self.results);
        }
        self.backend.open(reply_to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub requests: String,
    pub results: String,
    pub orders: String,
    pub blacklist: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            requests: "sec_kill_proxy2layer".into(),
            results: "sec_kill_layer2proxy".into(),
            orders: "sec_kill_layer2db".into(),
            blacklist: "sec_kill_blacklist".into(),
        }
    }
}
