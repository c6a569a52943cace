//! 秒杀リクエスト/結果/注文のワイヤ型
//!
//! フロント層とバック層はキュー越しにこれらを JSON でやり取りする。
//! どのメッセージも自分の相関キーを復元できるだけの情報を持つ。

use serde::{Deserialize, Serialize};

/// 呼び出し元に見える結果コード
///
/// ワイヤ上は kebab-case 文字列（`"sold-out"` など）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Success,
    NotFound,
    SoldOut,
    AlreadyBought,
    Retry,
    ServiceBusy,
    Timeout,
    ClientClosed,
    /// 販売開始前（フロント層の事前チェック）
    NotStarted,
    /// 販売終了後（フロント層の事前チェック）
    Ended,
}

impl StatusCode {
    /// 数値コード（HTTP レスポンスの `code` フィールド）
    pub fn code(self) -> u32 {
        match self {
            Self::ServiceBusy => 1001,
            Self::Success => 1002,
            Self::NotFound => 1003,
            Self::SoldOut => 1004,
            Self::Retry => 1005,
            Self::AlreadyBought => 1006,
            Self::NotStarted => 1007,
            Self::Ended => 1008,
            Self::Timeout => 1009,
            Self::ClientClosed => 1010,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not-found",
            Self::SoldOut => "sold-out",
            Self::AlreadyBought => "already-bought",
            Self::Retry => "retry",
            Self::ServiceBusy => "service-busy",
            Self::Timeout => "timeout",
            Self::ClientClosed => "client-closed",
            Self::NotStarted => "not-started",
            Self::Ended => "ended",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 相関キー: `"{user_id}_{product_id}"`
#[inline]
pub fn correlation_key(user_id: u64, product_id: u64) -> String {
    format!("{}_{}", user_id, product_id)
}

/// 購入リクエスト（リクエストキューのメッセージ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub client_addr: String,
    /// 受付時刻（unix 秒）
    pub access_time: i64,
    pub correlation_key: String,
    #[serde(default)]
    pub access_token: String,
    /// 結果を返すキュー名
    #[serde(default)]
    pub reply_to: String,
}

impl PurchaseRequest {
    pub fn new(
        product_id: u64,
        user_id: u64,
        username: impl Into<String>,
        client_addr: impl Into<String>,
        access_time: i64,
    ) -> Self {
        Self {
            product_id,
            user_id,
            username: username.into(),
            client_addr: client_addr.into(),
            access_time,
            correlation_key: correlation_key(user_id, product_id),
            access_token: String::new(),
            reply_to: String::new(),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = queue.into();
        self
    }
}

/// 購入結果（結果キューのメッセージ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub product_id: u64,
    pub user_id: u64,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub token_time: i64,
}

impl PurchaseResult {
    pub fn new(product_id: u64, user_id: u64, status: StatusCode) -> Self {
        Self {
            product_id,
            user_id,
            status,
            token: None,
            token_time: 0,
        }
    }

    pub fn success(product_id: u64, user_id: u64, token: String, token_time: i64) -> Self {
        Self {
            product_id,
            user_id,
            status: StatusCode::Success,
            token: Some(token),
            token_time,
        }
    }

    pub fn correlation_key(&self) -> String {
        correlation_key(self.user_id, self.product_id)
    }
}

/// 成約した注文（注文キューのメッセージ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub product_id: u64,
    pub product_name: String,
    pub user_id: u64,
    pub buyer: String,
    pub price: u64,
    pub order_time: i64,
}
