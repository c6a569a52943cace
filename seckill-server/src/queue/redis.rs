//! Redis list バックエンド
//!
//! - push: LPUSH（ConnectionManager を共有、再接続は manager 任せ）
//! - pop : BRPOP（呼び出しごとに専用接続を借りる。ブロッキングコマンドが
//!   多重化接続の他コマンドや、同じキューの他 worker を止めないように分離する）

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{QueueBackend, QueueError, WorkQueue};

pub struct RedisQueue {
    name: String,
    client: Client,
    conn: ConnectionManager,
    pop_conns: IdlePool<MultiplexedConnection>,
}

impl RedisQueue {
    fn new(name: &str, client: Client, conn: ConnectionManager) -> Self {
        Self {
            name: name.to_string(),
            client,
            conn,
            pop_conns: IdlePool::default(),
        }
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: String) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.name)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError> {
        if wait.is_zero() {
            let mut conn = self.conn.clone();
            let item: Option<String> = redis::cmd("RPOP").arg(&self.name).query_async(&mut conn).await?;
            return Ok(item);
        }
        let mut conn = match self.pop_conns.take() {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };

        // BRPOP の 0 は無期限なので最低 1 秒（0 待ちは上の RPOP）
        let secs = wait.as_secs().max(1);
        let popped: Result<Option<(String, String)>, redis::RedisError> = redis::cmd("BRPOP")
            .arg(&self.name)
            .arg(secs)
            .query_async(&mut conn)
            .await;
        match popped {
            Ok(item) => {
                self.pop_conns.put(conn);
                Ok(item.map(|(_, payload)| payload))
            }
            // 壊れた接続は戻さない（次回に張り直す）
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(&self.name).query_async(&mut conn).await?;
        Ok(len)
    }
}

pub struct RedisBackend {
    client: Client,
    conn: ConnectionManager,
    queues: DashMap<String, Arc<RedisQueue>>,
}

impl RedisBackend {
    /// 接続できなければ起動失敗
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            queues: DashMap::new(),
        })
    }
}

impl QueueBackend for RedisBackend {
    fn open(&self, name: &str) -> Arc<dyn WorkQueue> {
        let queue = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RedisQueue::new(name, self.client.clone(), self.conn.clone())))
            .clone();
        queue
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

/// 遊休接続のプール。借りている間は他の呼び出しと共有しない
struct IdlePool<T> {
    idle: Mutex<Vec<T>>,
}

impl<T> Default for IdlePool<T> {
    fn default() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }
}

impl<T> IdlePool<T> {
    fn take(&self) -> Option<T> {
        self.idle.lock().pop()
    }

    fn put(&self, item: T) {
        self.idle.lock().push(item);
    }
}
