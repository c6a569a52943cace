//! JWT 認証モジュール
//!
//! HS256 署名を検証し、購入者の userId / username を取り出す。
//! トークン発行はこのサービスの外（ログインサービス）で行う。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use seckill_core::unix_now;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 認証済みの購入者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: u64,
    pub username: String,
    /// 検証済みトークン（リクエストにそのまま載せる）
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("jwt secret not configured")]
    SecretNotConfigured,
    #[error("missing bearer token")]
    MissingBearerToken,
    #[error("invalid jwt format")]
    InvalidJwtFormat,
    #[error("invalid jwt header")]
    InvalidJwtHeader,
    #[error("invalid jwt payload")]
    InvalidJwtPayload,
    #[error("unsupported jwt alg")]
    UnsupportedAlg,
    #[error("invalid jwt signature")]
    InvalidJwtSignature,
    #[error("missing exp")]
    MissingExp,
    #[error("token expired")]
    TokenExpired,
    #[error("token not yet valid")]
    TokenNotYetValid,
    #[error("missing user id")]
    MissingUserId,
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretNotConfigured => "SECRET_NOT_CONFIGURED",
            Self::MissingBearerToken => "MISSING_BEARER_TOKEN",
            Self::InvalidJwtFormat => "INVALID_JWT_FORMAT",
            Self::InvalidJwtHeader => "INVALID_JWT_HEADER",
            Self::InvalidJwtPayload => "INVALID_JWT_PAYLOAD",
            Self::UnsupportedAlg => "UNSUPPORTED_ALG",
            Self::InvalidJwtSignature => "INVALID_JWT_SIGNATURE",
            Self::MissingExp => "MISSING_EXP",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::MissingUserId => "MISSING_USER_ID",
        }
    }
}

/// JWT 認証器
pub struct JwtAuth {
    mac: Option<HmacSha256>,
    clock_skew_sec: i64,
}

impl JwtAuth {
    /// secret が空 / None なら全リクエストを SecretNotConfigured で拒否する
    pub fn new(secret: Option<&str>, clock_skew_sec: i64) -> Self {
        let mac = secret
            .filter(|s| !s.is_empty())
            .and_then(|s| HmacSha256::new_from_slice(s.as_bytes()).ok());
        Self {
            mac,
            clock_skew_sec,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mac.is_some()
    }

    /// Authorization ヘッダーを検証
    pub fn authenticate(&self, authorization_header: Option<&str>) -> Result<Principal, AuthError> {
        let mac = self.mac.as_ref().ok_or(AuthError::SecretNotConfigured)?;
        let token = parse_bearer_token(authorization_header).ok_or(AuthError::MissingBearerToken)?;
        self.verify_hs256(mac, token, unix_now())
    }

    fn verify_hs256(&self, mac: &HmacSha256, token: &str, now: i64) -> Result<Principal, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidJwtFormat);
        };

        let header = decode_json(header_b64).ok_or(AuthError::InvalidJwtHeader)?;
        if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
            return Err(AuthError::UnsupportedAlg);
        }

        // 署名検証（verify_slice は定数時間比較）
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::InvalidJwtSignature)?;
        let mut mac = mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| AuthError::InvalidJwtSignature)?;

        let payload = decode_json(payload_b64).ok_or(AuthError::InvalidJwtPayload)?;

        let exp = payload
            .get("exp")
            .and_then(|v| v.as_i64())
            .ok_or(AuthError::MissingExp)?;
        if now > exp + self.clock_skew_sec {
            return Err(AuthError::TokenExpired);
        }
        if let Some(nbf) = payload.get("nbf").and_then(|v| v.as_i64()) {
            if now < nbf - self.clock_skew_sec {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        // userId（数値 or 数値文字列）、無ければ sub
        let user_id = ["userId", "sub"]
            .iter()
            .filter_map(|k| payload.get(*k))
            .find_map(claim_u64)
            .ok_or(AuthError::MissingUserId)?;
        let username = ["username", "name"]
            .iter()
            .filter_map(|k| payload.get(*k).and_then(|v| v.as_str()))
            .find(|s| !s.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| user_id.to_string());

        Ok(Principal {
            user_id,
            username,
            token: token.to_string(),
        })
    }
}

fn parse_bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.trim().strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

fn claim_u64(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn decode_json(b64_url: &str) -> Option<serde_json::Value> {
    let bytes = URL_SAFE_NO_PAD.decode(b64_url).ok()?;
    serde_json::from_slice(&bytes).ok()
}
