use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::ResponseStatus;
use crate::utils::error::AppError;

const ISSUER: &str = "eventapp";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID
    #[serde(default)]
    pub email: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

/// A freshly signed login token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Authentication service
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, self.config.bcrypt_cost)
    }

    /// Verify a password against its hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    /// Sign a login token for a user
    pub fn issue_token(&self, user_id: &Uuid, email: &str) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.jwt_expires_in_seconds);
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Validate and decode a login token
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }

    /// Hash a token for storage (using SHA-256)
    pub fn hash_token(&self, token: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Six random digits from the OS RNG.
    pub fn generate_otp(&self) -> Result<String, getrandom::Error> {
        // largest multiple of 10^6 below u32::MAX, to keep digits uniform
        const CEILING: u32 = 4_294_000_000;
        loop {
            let mut buf = [0u8; 4];
            getrandom::getrandom(&mut buf)?;
            let n = u32::from_le_bytes(buf);
            if n < CEILING {
                return Ok(format!("{:06}", n % 1_000_000));
            }
        }
    }

    pub fn otp_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::minutes(self.config.otp_expire_minutes)
    }
}

/// Caller identity resolved by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub token_hash: String,
}

impl AuthUser {
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(req.extensions().get::<AuthUser>().cloned().ok_or_else(|| {
            AppError::unauthorized(ResponseStatus::Unauthorized.default_message())
        }))
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract token from request headers
pub fn extract_token_from_request(req: &impl HttpMessage) -> Option<String> {
    // Try Authorization header first
    if let Some(auth_header) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = extract_bearer_token(auth_str) {
                return Some(token.to_string());
            }
        }
    }

    // Try cookie as fallback
    if let Some(cookie_header) = req.headers().get("cookie") {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("access_token=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Sliding-window request counter keyed by client and route.
#[derive(Default)]
pub struct RateLimitStore {
    requests: HashMap<String, Vec<i64>>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&mut self, key: &str, max_requests: u32, window_seconds: u64) -> bool {
        let now = Utc::now().timestamp();
        let window_start = now - window_seconds as i64;

        let user_requests = self.requests.entry(key.to_string()).or_default();

        // Remove old requests outside the window
        user_requests.retain(|&timestamp| timestamp > window_start);

        if user_requests.len() >= max_requests as usize {
            return false;
        }

        user_requests.push(now);
        true
    }

    /// Drop keys with no request in the last hour.
    pub fn cleanup(&mut self) {
        let one_hour_ago = Utc::now().timestamp() - 3600;

        self.requests.retain(|_, timestamps| {
            timestamps.retain(|&timestamp| timestamp > one_hour_ago);
            !timestamps.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            jwt_secret: "test-secret".into(),
            jwt_expires_in_seconds: 600,
            bcrypt_cost: 4,
            otp_expire_minutes: 10,
            max_login_retry_limit: 3,
            login_reactive_minutes: 20,
            google_client_id: None,
        })
    }

    #[test]
    fn token_round_trip_and_tamper() {
        let auth = service();
        let id = Uuid::new_v4();
        let issued = auth.issue_token(&id, "a@b.io").unwrap();
        let claims = auth.validate_token(&issued.token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.email, "a@b.io");

        let mut tampered = issued.token.clone();
        tampered.push('x');
        assert!(auth.validate_token(&tampered).is_err());
    }

    #[test]
    fn tokens_are_distinct_per_issue() {
        let auth = service();
        let id = Uuid::new_v4();
        let a = auth.issue_token(&id, "").unwrap();
        let b = auth.issue_token(&id, "").unwrap();
        assert_ne!(auth.hash_token(&a.token), auth.hash_token(&b.token));
    }

    #[test]
    fn otp_is_six_digits() {
        let auth = service();
        for _ in 0..20 {
            let otp = auth.generate_otp().unwrap();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn password_hash_verifies() {
        let auth = service();
        let hash = auth.hash_password("hunter22").unwrap();
        assert!(auth.verify_password("hunter22", &hash).unwrap());
        assert!(!auth.verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn token_from_header_or_cookie() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc"))
            .to_http_request();
        assert_eq!(extract_token_from_request(&req).as_deref(), Some("abc"));

        let req = TestRequest::default()
            .insert_header(("Cookie", "theme=dark; access_token=xyz"))
            .to_http_request();
        assert_eq!(extract_token_from_request(&req).as_deref(), Some("xyz"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic abc"))
            .to_http_request();
        assert_eq!(extract_token_from_request(&req), None);
    }

    #[test]
    fn rate_limit_window() {
        let mut store = RateLimitStore::new();
        assert!(store.is_allowed("k", 2, 60));
        assert!(store.is_allowed("k", 2, 60));
        assert!(!store.is_allowed("k", 2, 60));
        assert!(store.is_allowed("other", 2, 60));
        store.cleanup();
        assert_eq!(store.tracked_keys(), 2);
    }
}
