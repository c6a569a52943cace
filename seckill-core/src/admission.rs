//! Admission gate: blacklist + fixed-window access counters.
//!
//! - user_id と client_addr それぞれに 1 秒窓 / 60 秒窓のカウンタを持つ
//! - 閾値を超えた ID/アドレスはブラックリスト入り（プロセス生存中は永続）
//! - 窓は固定（スライドしない）。境界をまたぐバーストは最大 2 倍まで通る
//! - 全状態を 1 つの mutex で保護する。クリティカルセクションは O(1)

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

pub const SECOND_WINDOW: i64 = 1;
pub const MINUTE_WINDOW: i64 = 60;

/// アクセス上限（0 はその窓を無効化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessLimits {
    pub user_per_sec: u32,
    pub user_per_min: u32,
    pub addr_per_sec: u32,
    pub addr_per_min: u32,
}

impl Default for AccessLimits {
    fn default() -> Self {
        Self {
            user_per_sec: 1,
            user_per_min: 10,
            addr_per_sec: 50,
            addr_per_min: 500,
        }
    }
}

/// どの窓で超過したか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UserBlacklisted,
    AddrBlacklisted,
    UserRateExceeded(Window),
    AddrRateExceeded(Window),
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserBlacklisted => "user_blacklisted",
            Self::AddrBlacklisted => "addr_blacklisted",
            Self::UserRateExceeded(Window::Second) => "user_rate_sec",
            Self::UserRateExceeded(Window::Minute) => "user_rate_min",
            Self::AddrRateExceeded(Window::Second) => "addr_rate_sec",
            Self::AddrRateExceeded(Window::Minute) => "addr_rate_min",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 固定窓カウンタ
#[derive(Debug, Clone, Copy, Default)]
struct FixedWindow {
    count: u32,
    start: i64,
}

impl FixedWindow {
    /// 加算して現在値を返す。経過が窓幅を超えていたら count=1 から数え直す
    #[inline]
    fn hit(&mut self, now: i64, width: i64) -> u32 {
        if now - self.start > width {
            self.count = 1;
            self.start = now;
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.count
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AccessWindows {
    sec: FixedWindow,
    min: FixedWindow,
}

impl AccessWindows {
    fn hit(&mut self, now: i64, per_sec: u32, per_min: u32) -> Option<Window> {
        let sec = self.sec.hit(now, SECOND_WINDOW);
        let min = self.min.hit(now, MINUTE_WINDOW);
        if per_sec > 0 && sec > per_sec {
            return Some(Window::Second);
        }
        if per_min > 0 && min > per_min {
            return Some(Window::Minute);
        }
        None
    }
}

#[derive(Debug, Default)]
struct GateState {
    user_windows: HashMap<u64, AccessWindows>,
    addr_windows: HashMap<String, AccessWindows>,
    user_blacklist: HashSet<u64>,
    addr_blacklist: HashSet<String>,
}

pub struct AdmissionGate {
    limits: AccessLimits,
    state: Mutex<GateState>,
}

impl AdmissionGate {
    pub fn new(limits: AccessLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn limits(&self) -> AccessLimits {
        self.limits
    }

    /// 入場判定（最初の拒否で打ち切る）
    ///
    /// `now` は unix 秒。ブラックリスト済みならカウンタには触れない。
    pub fn admit(&self, user_id: u64, client_addr: &str, now: i64) -> Result<(), DenyReason> {
        let mut state = self.state.lock();

        if state.user_blacklist.contains(&user_id) {
            return Err(DenyReason::UserBlacklisted);
        }
        if state.addr_blacklist.contains(client_addr) {
            return Err(DenyReason::AddrBlacklisted);
        }

        let exceeded = state.user_windows.entry(user_id).or_default().hit(
            now,
            self.limits.user_per_sec,
            self.limits.user_per_min,
        );
        if let Some(window) = exceeded {
            state.user_blacklist.insert(user_id);
            return Err(DenyReason::UserRateExceeded(window));
        }

        let exceeded = match state.addr_windows.get_mut(client_addr) {
            Some(w) => w.hit(now, self.limits.addr_per_sec, self.limits.addr_per_min),
            None => state
                .addr_windows
                .entry(client_addr.to_string())
                .or_default()
                .hit(now, self.limits.addr_per_sec, self.limits.addr_per_min),
        };
        if let Some(window) = exceeded {
            state.addr_blacklist.insert(client_addr.to_string());
            return Err(DenyReason::AddrRateExceeded(window));
        }

        Ok(())
    }

    pub fn block_user(&self, user_id: u64) -> bool {
        self.state.lock().user_blacklist.insert(user_id)
    }

    pub fn block_addr(&self, client_addr: &str) -> bool {
        self.state.lock().addr_blacklist.insert(client_addr.to_string())
    }

    pub fn unblock_user(&self, user_id: u64) -> bool {
        let mut state = self.state.lock();
        state.user_windows.remove(&user_id);
        state.user_blacklist.remove(&user_id)
    }

    pub fn unblock_addr(&self, client_addr: &str) -> bool {
        let mut state = self.state.lock();
        state.addr_windows.remove(client_addr);
        state.addr_blacklist.remove(client_addr)
    }

    pub fn clear_blacklist(&self) {
        let mut state = self.state.lock();
        state.user_blacklist.clear();
        state.addr_blacklist.clear();
    }

    pub fn is_user_blocked(&self, user_id: u64) -> bool {
        self.state.lock().user_blacklist.contains(&user_id)
    }

    pub fn is_addr_blocked(&self, client_addr: &str) -> bool {
        self.state.lock().addr_blacklist.contains(client_addr)
    }

    /// (ブラックリスト済みユーザー数, ブラックリスト済みアドレス数)
    pub fn blacklist_len(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.user_blacklist.len(), state.addr_blacklist.len())
    }

    #[cfg(test)]
    fn user_count(&self, user_id: u64) -> Option<(u32, u32)> {
        self.state
            .lock()
            .user_windows
            .get(&user_id)
            .map(|w| (w.sec.count, w.min.count))
    }
}
