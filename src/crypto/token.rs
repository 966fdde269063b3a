use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Name of the cookie carrying the session token
pub const TOKEN_COOKIE: &str = "jwt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub userid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign an HS256 token for `user_id` valid for `max_age`
pub fn generate_token(user_id: &str, secret: &str, max_age: Duration) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        userid: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + max_age).timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Verify signature and expiry, returning the claims
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn test_token_round_trip() {
        let token = generate_token("user-1", SECRET, Duration::days(7)).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();

        assert_eq!(claims.userid, "user-1");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_token("user-1", SECRET, Duration::days(7)).unwrap();
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(AppError::Token(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Beyond the default 60s leeway
        let token = generate_token("user-1", SECRET, Duration::minutes(-5)).unwrap();
        assert!(verify_token(&token, SECRET).is_err());
    }
}
