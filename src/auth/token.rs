use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i32, email: &str, role: Role, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
        }
    }
}

pub struct JwtKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expires_in: Duration,
}

impl JwtKeys {
    pub fn new(secret: &[u8], expiration_hours: i64) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            expires_in: Duration::hours(expiration_hours),
        }
    }

    pub fn issue(&self, user_id: i32, email: &str, role: Role) -> Result<String, AppError> {
        let claims = Claims::new(user_id, email, role, self.expires_in);
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired".into()),
                _ => AppError::Unauthorized("Invalid token".into()),
            })
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expires_in.num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_decodes() {
        let keys = JwtKeys::new(b"test-secret", 1);
        let token = keys.issue(42, "ed@example.com", Role::Editor).unwrap();
        let claims = keys.decode(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "ed@example.com");
        assert_eq!(claims.role, Role::Editor);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new(b"test-secret", 1);
        let claims = Claims::new(1, "a@example.com", Role::Author, Duration::hours(-2));
        let token = keys.encode(&claims).unwrap();
        match keys.decode(&token) {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "Token expired"),
            other => panic!("expected expiry rejection, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = JwtKeys::new(b"one", 1);
        let verifier = JwtKeys::new(b"two", 1);
        let token = issuer.issue(1, "a@example.com", Role::Author).unwrap();
        assert!(matches!(
            verifier.decode(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let keys = JwtKeys::new(b"secret", 1);
        assert!(keys.decode("not.a.jwt").is_err());
    }
}
