//! 注文シンク
//!
//! order キューを一定間隔で吸い出し、JSON Lines ファイルへ追記する。
//! 追記が失敗したバッチはメモリに残し、次回の先頭で再試行する。
//! 残しておける上限（`MAX_PENDING`）を超えた分だけ lost として数える。

use parking_lot::Mutex;
use seckill_core::Order;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;

/// 1 回の吸い出し上限
const MAX_BATCH: usize = 10_000;
/// 追記失敗で持ち越せる上限
const MAX_PENDING: usize = 100_000;

#[derive(Debug, Default)]
struct SinkStats {
    written: AtomicU64,
    malformed: AtomicU64,
    failed_flushes: AtomicU64,
    lost: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SinkMetrics {
    pub written: u64,
    pub malformed: u64,
    pub failed_flushes: u64,
    /// 次回に持ち越している件数
    pub pending: u64,
    pub lost: u64,
}

pub struct OrderSink {
    orders: Arc<dyn WorkQueue>,
    path: PathBuf,
    /// 追記に失敗した行（次回の先頭に書く）
    pending: Mutex<Vec<String>>,
    stats: SinkStats,
}

impl OrderSink {
    pub fn new(orders: Arc<dyn WorkQueue>, path: impl AsRef<Path>) -> Self {
        Self {
            orders,
            path: path.as_ref().to_path_buf(),
            pending: Mutex::new(Vec::new()),
            stats: SinkStats::default(),
        }
    }

    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(path = %self.path.display(), interval_sec = interval.as_secs(), "order sink started");
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sink.flush_once().await;
            }
        })
    }

    /// 持ち越し分とキューにある分を書き出す。書いた件数を返す
    pub async fn flush_once(&self) -> usize {
        let mut lines = std::mem::take(&mut *self.pending.lock());
        let carried = lines.len();
        while lines.len() < carried + MAX_BATCH {
            match self.orders.pop(Duration::ZERO).await {
                Ok(Some(raw)) => match serde_json::from_str::<Order>(&raw) {
                    Ok(order) => match serde_json::to_string(&order) {
                        Ok(line) => lines.push(line),
                        Err(e) => warn!(error = %e, "order encode failed"),
                    },
                    Err(e) => {
                        self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "undecodable order dropped");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "order queue pop failed");
                    break;
                }
            }
        }
        if lines.is_empty() {
            return 0;
        }

        let n = lines.len();
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || {
            let result = append_lines(&path, &lines);
            (result, lines)
        })
        .await;
        match written {
            Ok((Ok(()), _)) => {
                self.stats.written.fetch_add(n as u64, Ordering::Relaxed);
                debug!(count = n, carried, "orders flushed");
                n
            }
            Ok((Err(e), lines)) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                error!(path = %self.path.display(), count = n, error = %e, "order append failed, retry next tick");
                self.carry_over(lines);
                0
            }
            Err(e) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.stats.lost.fetch_add(n as u64, Ordering::Relaxed);
                error!(count = n, error = %e, "order append task failed");
                0
            }
        }
    }

    /// 失敗したバッチを持ち越す。上限を超えた古い分は捨てる
    fn carry_over(&self, mut lines: Vec<String>) {
        let mut pending = self.pending.lock();
        // flush 中に積まれた分（通常は無い）は後ろに
        lines.append(&mut pending);
        if lines.len() > MAX_PENDING {
            let dropped = lines.len() - MAX_PENDING;
            lines.drain(..dropped);
            self.stats.lost.fetch_add(dropped as u64, Ordering::Relaxed);
            error!(dropped, "order carry-over overflow");
        }
        *pending = lines;
    }

    pub fn metrics(&self) -> SinkMetrics {
        SinkMetrics {
            written: self.stats.written.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            failed_flushes: self.stats.failed_flushes.load(Ordering::Relaxed),
            pending: self.pending.lock().len() as u64,
            lost: self.stats.lost.load(Ordering::Relaxed),
        }
    }
}

fn append_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.sync_data()
}
