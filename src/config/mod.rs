use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    // Keep-alive duration in seconds
    pub keep_alive_seconds: u64,
    // Client timeout for reading payload/body in seconds
    pub client_timeout_seconds: u64,
    // Client shutdown timeout in seconds
    pub client_shutdown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lifetime of an issued login token.
    pub jwt_expires_in_seconds: i64,
    pub bcrypt_cost: u32,
    pub otp_expire_minutes: i64,
    /// Failed password attempts before the account is locked.
    pub max_login_retry_limit: i64,
    pub login_reactive_minutes: i64,
    /// Expected `aud` of Google ID tokens; `None` accepts any audience.
    pub google_client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    pub brevo_api_key: Option<String>,
    pub sender_email: String,
    pub sender_name: String,
    pub fast2sms_api_key: Option<String>,
    pub fcm_server_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} must be a valid {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected: std::any::type_name::<T>(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parsed("PORT", 8080)?,
                workers: parsed("WORKERS", 4)?,
                max_connections: parsed("MAX_CONNECTIONS", 1000)?,
                keep_alive_seconds: parsed("KEEP_ALIVE_SECONDS", 75)?,
                client_timeout_seconds: parsed("CLIENT_TIMEOUT_SECONDS", 30)?,
                client_shutdown_seconds: parsed("CLIENT_SHUTDOWN_SECONDS", 5)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed("DB_MAX_CONNECTIONS", 10)?,
                connect_timeout_seconds: parsed("DB_CONNECT_TIMEOUT", 10)?,
            },
            auth: AuthConfig {
                jwt_secret: required("JWT_SECRET")?,
                jwt_expires_in_seconds: parsed("JWT_EXPIRES_IN", 10_000)?,
                bcrypt_cost: parsed("BCRYPT_COST", 10)?,
                otp_expire_minutes: parsed("OTP_EXPIRE_MINUTES", 10)?,
                max_login_retry_limit: parsed("MAX_LOGIN_RETRY_LIMIT", 3)?,
                login_reactive_minutes: parsed("LOGIN_REACTIVE_MINUTES", 20)?,
                google_client_id: optional("GOOGLE_CLIENT_ID"),
            },
            security: SecurityConfig {
                cors_allowed_origins: list(
                    "CORS_ALLOWED_ORIGINS",
                    "http://localhost:3000,http://127.0.0.1:3000",
                ),
                rate_limit_requests: parsed("RATE_LIMIT_REQUESTS", 30)?,
                rate_limit_window_seconds: parsed("RATE_LIMIT_WINDOW_SECONDS", 60)?,
                max_request_size_bytes: parsed("MAX_REQUEST_SIZE_BYTES", 2_097_152)?, // 2MB
            },
            notification: NotificationConfig {
                brevo_api_key: optional("BREVO_API_KEY"),
                sender_email: env::var("COMPANY_EMAIL")
                    .unwrap_or_else(|_| "no-reply@eventapp.local".to_string()),
                sender_name: env::var("COMPANY_NAME").unwrap_or_else(|_| "Event App".to_string()),
                fast2sms_api_key: optional("FAST2SMS_API_KEY"),
                fcm_server_key: optional("FCM_SERVER_KEY"),
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                directory: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            },
        })
    }
}
