//! ブラックリスト同期
//!
//! 起動時に設定のシードを入れ、以後は blacklist キューから追加分を取り込む。
//! エントリ形式: `user:<id>` / `ip:<addr>`（前後の空白は無視）

use seckill_core::AdmissionGate;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;

const POLL_WAIT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistEntry {
    User(u64),
    Addr(String),
}

impl BlacklistEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, value) = raw.trim().split_once(':')?;
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match kind.trim() {
            "user" => value.parse().ok().map(Self::User),
            "ip" => Some(Self::Addr(value.to_string())),
            _ => None,
        }
    }

    /// 新規追加なら true
    pub fn apply(&self, gate: &AdmissionGate) -> bool {
        match self {
            Self::User(id) => gate.block_user(*id),
            Self::Addr(addr) => gate.block_addr(addr),
        }
    }
}

/// 起動時のシード。追加した件数を返す
pub fn seed(gate: &AdmissionGate, user_ids: &[u64], addrs: &[String]) -> usize {
    let users = user_ids.iter().filter(|id| gate.block_user(**id)).count();
    let addrs = addrs.iter().filter(|a| gate.block_addr(a)).count();
    users + addrs
}

pub struct BlacklistSync {
    gate: Arc<AdmissionGate>,
    feed: Arc<dyn WorkQueue>,
}

impl BlacklistSync {
    pub fn new(gate: Arc<AdmissionGate>, feed: Arc<dyn WorkQueue>) -> Self {
        Self { gate, feed }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        info!(queue = self.feed.name(), "blacklist sync started");
        tokio::spawn(async move {
            loop {
                match self.feed.pop(POLL_WAIT).await {
                    Ok(Some(raw)) => {
                        self.ingest(&raw);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "blacklist feed pop failed");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        })
    }

    /// 1 エントリ取り込む
    pub fn ingest(&self, raw: &str) -> bool {
        match BlacklistEntry::parse(raw) {
            Some(entry) => {
                let added = entry.apply(&self.gate);
                debug!(entry = ?entry, added, "blacklist entry");
                added
            }
            None => {
                warn!(raw, "unrecognized blacklist entry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use seckill_core::{AccessLimits, DenyReason};

    #[test]
    fn parse_entries() {
        assert_eq!(BlacklistEntry::parse("user:42"), Some(BlacklistEntry::User(42)));
        assert_eq!(
            BlacklistEntry::parse(" ip: 10.1.2.3 "),
            Some(BlacklistEntry::Addr("10.1.2.3".into()))
        );
        assert_eq!(BlacklistEntry::parse("user:abc"), None);
        assert_eq!(BlacklistEntry::parse("ip:"), None);
        assert_eq!(BlacklistEntry::parse("host:x"), None);
        assert_eq!(BlacklistEntry::parse("42"), None);
    }

    #[test]
    fn seed_is_idempotent() {
        let gate = AdmissionGate::new(AccessLimits::default());
        let addrs = vec!["1.1.1.1".to_string()];
        assert_eq!(seed(&gate, &[1, 2], &addrs), 3);
        assert_eq!(seed(&gate, &[1, 2], &addrs), 0);
        assert_eq!(gate.blacklist_len(), (2, 1));
        assert_eq!(gate.admit(1, "9.9.9.9", 0), Err(DenyReason::UserBlacklisted));
    }

    #[tokio::test]
    async fn feed_entries_reach_gate() {
        let gate = Arc::new(AdmissionGate::new(AccessLimits::default()));
        let queue = Arc::new(MemoryQueue::new("blacklist"));
        let feed: Arc<dyn WorkQueue> = queue.clone();
        let handle = BlacklistSync::new(Arc::clone(&gate), feed).spawn();

        queue.push("ip:6.6.6.6".into()).await.unwrap();
        for _ in 0..100 {
            if gate.is_addr_blocked("6.6.6.6") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gate.admit(5, "6.6.6.6", 0), Err(DenyReason::AddrBlacklisted));
        handle.abort();
    }
}
