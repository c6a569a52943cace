//! Purchase token (HMAC-SHA256, base64url).
//!
//! 署名対象: `userId={}&productId={}&timestamp={}`。
//! 検証側は同じ共有シークレットで再計算して比較する。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
        })
    }

    pub fn sign(&self, user_id: u64, product_id: u64, timestamp: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(Self::payload(user_id, product_id, timestamp).as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, token: &str, user_id: u64, product_id: u64, timestamp: i64) -> bool {
        let Ok(raw) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(Self::payload(user_id, product_id, timestamp).as_bytes());
        mac.verify_slice(&raw).is_ok()
    }

    fn payload(user_id: u64, product_id: u64, timestamp: i64) -> String {
        format!(
            "userId={}&productId={}&timestamp={}",
            user_id, product_id, timestamp
        )
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSigner(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let signer = TokenSigner::new(b"passwd").unwrap();
        let token = signer.sign(1, 2, 1_700_000_000);
        assert!(signer.verify(&token, 1, 2, 1_700_000_000));
        assert!(!signer.verify(&token, 1, 3, 1_700_000_000));
        assert!(!signer.verify("not base64!", 1, 2, 1_700_000_000));
    }

    #[test]
    fn different_secret_different_token() {
        let a = TokenSigner::new(b"a").unwrap().sign(1, 2, 3);
        let b = TokenSigner::new(b"b").unwrap().sign(1, 2, 3);
        assert_ne!(a, b);
    }
}
