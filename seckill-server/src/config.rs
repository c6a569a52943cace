//! 設定管理
//!
//! `.env` があれば読み込み、環境変数で上書きする。未設定や parse 失敗は既定値。

use seckill_core::{AccessLimits, LockStrategy};
use std::env;
use std::time::Duration;

use crate::queue::QueueNames;

/// プロセスが担当する層
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// フロント層 + バック層（単一プロセス）
    All,
    /// フロント層のみ（HTTP + 結果ルーター）
    Front,
    /// バック層のみ（エンジン worker + 永続化）
    Back,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Front => "front",
            Self::Back => "back",
        }
    }

    pub fn runs_front(self) -> bool {
        matches!(self, Self::All | Self::Front)
    }

    pub fn runs_back(self) -> bool {
        matches!(self, Self::All | Self::Back)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "front" | "app" => Some(Self::Front),
            "back" | "core" => Some(Self::Back),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Memory,
    Redis,
}

/// カタログリフレッシュの反映方法（設定ストアのバージョンが変わったときだけ使う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// 全件入れ替え
    Replace,
    /// エンジン所有フィールド（残数 / SoldOut）を保持してマージ
    Merge,
}

impl RefreshMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace" => Self::Replace,
            _ => Self::Merge,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    /// HTTPサーバーポート
    pub port: u16,
    pub queue_backend: QueueBackendKind,
    pub redis_url: String,
    pub queues: QueueNames,
    pub access_limits: AccessLimits,
    /// フロント層が結果を待つ上限
    pub wait_result_timeout: Duration,
    /// バック層がこれより古いリクエストを捨てる
    pub max_request_age: Duration,
    pub read_result_workers: usize,
    pub handle_workers: usize,
    pub lock_strategy: LockStrategy,
    pub token_secret: String,
    pub config_store_path: String,
    pub stock_store_path: String,
    pub order_log_path: String,
    pub catalog_refresh_interval: Duration,
    pub refresh_mode: RefreshMode,
    pub persist_interval: Duration,
    pub order_flush_interval: Duration,
    pub blacklist_user_ids: Vec<u64>,
    pub blacklist_addrs: Vec<String>,
    pub jwt_secret: Option<String>,
}

impl Config {
    /// 環境変数から設定を読み込む
    ///
    /// - SECKILL_ROLE (all | front | back, デフォルト: all)
    /// - SECKILL_PORT (デフォルト: 9090)
    /// - QUEUE_BACKEND (memory | redis, デフォルト: memory)
    /// - REDIS_URL (デフォルト: redis://127.0.0.1:6379)
    /// - APP_WAIT_RESULT_TIMEOUT_MS (デフォルト: 3000)
    /// - CORE_LOCK_STRIPES (0/1 = 全体ロック)
    /// - CATALOG_REFRESH_MODE (merge | replace, デフォルト: merge)
    pub fn from_env() -> Self {
        // .envファイルがあれば読み込む（無くてもエラーにしない）
        let _ = dotenvy::dotenv();

        let defaults = AccessLimits::default();
        let queue_defaults = QueueNames::default();
        let stripes: usize = env_parse("CORE_LOCK_STRIPES", 0);

        Self {
            role: env::var("SECKILL_ROLE")
                .ok()
                .and_then(|v| Role::parse(&v))
                .unwrap_or(Role::All),
            port: env_parse("SECKILL_PORT", 9090),
            queue_backend: match env::var("QUEUE_BACKEND").as_deref() {
                Ok("redis") => QueueBackendKind::Redis,
                _ => QueueBackendKind::Memory,
            },
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            queues: QueueNames {
                requests: env::var("SECKILL_REQUEST_QUEUE").unwrap_or(queue_defaults.requests),
                results: env::var("SECKILL_RESULT_QUEUE").unwrap_or(queue_defaults.results),
                orders: env::var("SECKILL_ORDER_QUEUE").unwrap_or(queue_defaults.orders),
                blacklist: env::var("SECKILL_BLACKLIST_QUEUE").unwrap_or(queue_defaults.blacklist),
            },
            access_limits: AccessLimits {
                user_per_sec: env_parse("USER_SEC_ACCESS_LIMIT", defaults.user_per_sec),
                user_per_min: env_parse("USER_MIN_ACCESS_LIMIT", defaults.user_per_min),
                addr_per_sec: env_parse("IP_SEC_ACCESS_LIMIT", defaults.addr_per_sec),
                addr_per_min: env_parse("IP_MIN_ACCESS_LIMIT", defaults.addr_per_min),
            },
            wait_result_timeout: Duration::from_millis(env_parse("APP_WAIT_RESULT_TIMEOUT_MS", 3_000)),
            max_request_age: Duration::from_millis(env_parse("MAX_REQUEST_WAIT_TIMEOUT_MS", 30_000)),
            read_result_workers: env_parse::<usize>("APP_READ_RESULT_WORKERS", 4).max(1),
            handle_workers: env_parse::<usize>("CORE_HANDLE_WORKERS", 8).max(1),
            lock_strategy: if stripes > 1 {
                LockStrategy::Striped(stripes)
            } else {
                LockStrategy::Global
            },
            token_secret: env::var("TOKEN_SECRET").unwrap_or_else(|_| "seckill-token-secret".into()),
            config_store_path: env::var("CONFIG_STORE_PATH")
                .unwrap_or_else(|_| "var/seckill/products.json".into()),
            stock_store_path: env::var("STOCK_STORE_PATH")
                .unwrap_or_else(|_| "var/seckill/stock.json".into()),
            order_log_path: env::var("ORDER_LOG_PATH")
                .unwrap_or_else(|_| "var/seckill/orders.jsonl".into()),
            catalog_refresh_interval: Duration::from_secs(env_parse("CATALOG_REFRESH_SEC", 5)),
            refresh_mode: env::var("CATALOG_REFRESH_MODE")
                .map(|v| RefreshMode::parse(&v))
                .unwrap_or(RefreshMode::Merge),
            persist_interval: Duration::from_secs(env_parse("PERSIST_SYNC_SEC", 30)),
            order_flush_interval: Duration::from_secs(env_parse("ORDER_FLUSH_SEC", 30)),
            blacklist_user_ids: env::var("BLACKLIST_USER_IDS")
                .map(|v| parse_list(&v).filter_map(|s| s.parse().ok()).collect())
                .unwrap_or_default(),
            blacklist_addrs: env::var("BLACKLIST_IPS")
                .map(|v| parse_list(&v).map(str::to_string).collect())
                .unwrap_or_default(),
            jwt_secret: env::var("JWT_HS256_SECRET").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// カンマ区切り（空要素は無視）
fn parse_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_aliases() {
        assert_eq!(Role::parse("ALL"), Some(Role::All));
        assert_eq!(Role::parse("app"), Some(Role::Front));
        assert_eq!(Role::parse("core"), Some(Role::Back));
        assert_eq!(Role::parse("both"), None);
        assert!(Role::All.runs_front() && Role::All.runs_back());
        assert!(!Role::Front.runs_back());
    }

    #[test]
    fn refresh_mode_defaults_to_merge() {
        assert_eq!(RefreshMode::parse("Replace"), RefreshMode::Replace);
        assert_eq!(RefreshMode::parse("merge"), RefreshMode::Merge);
        assert_eq!(RefreshMode::parse(""), RefreshMode::Merge);
    }

    #[test]
    fn list_parsing_skips_blanks() {
        let items: Vec<&str> = parse_list(" 1, ,2,,3 ").collect();
        assert_eq!(items, vec!["1", "2", "3"]);
    }
}
