//! JWT utilities for the admin session (HS256).

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, always "admin" for sidecar sessions.
    pub sub: String,
    /// Expiry as unix seconds.
    pub exp: i64,
    /// Issued-at as unix seconds.
    pub iat: i64,
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expire_hours: i64,
}

impl JwtUtil {
    pub fn new(secret: &str, expire_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            // Admin sessions never outlive a day.
            expire_hours: expire_hours.clamp(1, 24),
        }
    }

    pub fn generate_token(&self, subject: &str) -> ApiResult<(String, i64)> {
        let now = Utc::now().timestamp();
        let exp = now + self.expire_hours * 3600;
        let claims = Claims { sub: subject.to_string(), exp, iat: now };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal_error(format!("failed to sign token: {}", e)))?;
        Ok((token, exp))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let util = JwtUtil::new("test-secret", 24);
        let (token, exp) = util.generate_token("admin").unwrap();
        let claims = util.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn rejects_foreign_secret() {
        let a = JwtUtil::new("secret-a", 24);
        let b = JwtUtil::new("secret-b", 24);
        let (token, _) = a.generate_token("admin").unwrap();
        assert!(b.verify_token(&token).is_err());
    }

    #[test]
    fn expiry_is_capped_at_24h() {
        let util = JwtUtil::new("s", 96);
        let (_, exp) = util.generate_token("admin").unwrap();
        assert!(exp - Utc::now().timestamp() <= 24 * 3600 + 5);
    }
}
