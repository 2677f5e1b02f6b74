use serde_json::{Map, Value};
use std::sync::Arc;

use crate::database::DocumentStore;

/// Collection that receives sanitized internal errors.
pub const ERROR_LOG_COLLECTION: &str = "errorLogs";

/// Keys whose values are masked before an error record leaves the process.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "newPassword",
    "token",
    "access_token",
    "authorization",
    "credentials",
    "otp",
    "code",
    "email",
    "phone",
];

/// Mask sensitive values partially (e.g., tokens, emails, passwords)
pub fn mask_sensitive(value: &str) -> String {
    if value.is_empty() {
        return "".to_string();
    }

    // If it looks like an email, mask local part
    if let Some((local, domain)) = value.split_once('@') {
        let visible: String = local.chars().take(if local.chars().count() <= 2 { 1 } else { 2 }).collect();
        return format!("{}***@{}", visible, domain);
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return format!("{}***", chars[0]);
    }

    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", start, end)
}

/// Truncate string to maximum length (in characters)
pub fn truncate_string(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        input.to_string()
    } else {
        let kept: String = input.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Mask sensitive keys at any depth.
pub fn sanitize_details(details: Value) -> Value {
    match details {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) if SENSITIVE_KEYS.contains(&k.as_str()) => {
                            Value::String(mask_sensitive(&s))
                        }
                        Value::Number(_) if SENSITIVE_KEYS.contains(&k.as_str()) => {
                            Value::String("***".to_string())
                        }
                        other => sanitize_details(other),
                    };
                    (k, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_details).collect()),
        Value::String(s) => Value::String(truncate_string(&s, 1024)),
        other => other,
    }
}

/// Flatten validator errors into display messages
pub fn flatten_validation_errors(err: &validator::ValidationErrors) -> Vec<String> {
    let mut msgs = Vec::new();
    for (field, errors) in err.field_errors().iter() {
        for e in errors.iter() {
            let message = match &e.message {
                Some(m) => m.to_string(),
                None => format!("{} {}", field, e.code),
            };
            msgs.push(message);
        }
    }
    msgs.sort();
    msgs
}

/// Logging helpers
pub mod logging {
    use log::{Level, LevelFilter};

    pub fn level_from_string(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    pub fn level_for_status(status: u16) -> Level {
        match status {
            400..=499 => Level::Warn,
            500..=599 => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn log_request(method: &str, path: &str, status: u16, duration_ms: u128, remote_addr: &str) {
        log::log!(
            level_for_status(status),
            "{} {} {} {}ms from {}",
            method,
            path,
            status,
            duration_ms,
            remote_addr
        );
    }
}

/// Error handling utilities
pub mod error {
    use actix_web::{http::StatusCode, HttpResponse, ResponseError};

    use crate::database::{FilterError, StoreError};
    use crate::models::ResponseStatus;

    #[derive(Debug, thiserror::Error)]
    pub enum AppError {
        #[error("{0}")]
        Validation(String),
        #[error("{0}")]
        BadRequest(String),
        #[error("{0}")]
        Failure(String),
        #[error("{0}")]
        Unauthorized(String),
        #[error("{0}")]
        NotFound(String),
        #[error("store error: {0}")]
        Store(StoreError),
        #[error("{0}")]
        Internal(String),
    }

    impl AppError {
        pub fn validation(message: impl Into<String>) -> Self {
            Self::Validation(message.into())
        }

        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::BadRequest(message.into())
        }

        pub fn failure(message: impl Into<String>) -> Self {
            Self::Failure(message.into())
        }

        pub fn unauthorized(message: impl Into<String>) -> Self {
            Self::Unauthorized(message.into())
        }

        pub fn not_found() -> Self {
            Self::NotFound(ResponseStatus::RecordNotFound.default_message().to_string())
        }

        pub fn internal(message: impl Into<String>) -> Self {
            Self::Internal(message.into())
        }

        pub fn status(&self) -> ResponseStatus {
            match self {
                Self::Validation(_) => ResponseStatus::ValidationError,
                Self::BadRequest(_) => ResponseStatus::BadRequest,
                Self::Failure(_) => ResponseStatus::Failure,
                Self::Unauthorized(_) => ResponseStatus::Unauthorized,
                Self::NotFound(_) => ResponseStatus::RecordNotFound,
                Self::Store(_) | Self::Internal(_) => ResponseStatus::ServerError,
            }
        }

        pub fn is_internal(&self) -> bool {
            self.status() == ResponseStatus::ServerError
        }

        /// Message safe to show to clients.
        pub fn public_message(&self) -> String {
            if self.is_internal() {
                ResponseStatus::ServerError.default_message().to_string()
            } else {
                self.to_string()
            }
        }
    }

    impl From<StoreError> for AppError {
        fn from(err: StoreError) -> Self {
            match err {
                StoreError::Filter(e) => e.into(),
                other => Self::Store(other),
            }
        }
    }

    impl From<FilterError> for AppError {
        fn from(err: FilterError) -> Self {
            Self::Validation(format!("Invalid values in parameters, {}", err))
        }
    }

    impl ResponseError for AppError {
        fn status_code(&self) -> StatusCode {
            StatusCode::from_u16(self.status().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }

        fn error_response(&self) -> HttpResponse {
            super::response::error_response(self.status(), &self.public_message())
        }
    }
}

/// Response helpers
pub mod response {
    use actix_web::http::StatusCode;
    use actix_web::HttpResponse;
    use serde::Serialize;

    use crate::models::{ApiResponse, ResponseStatus};

    pub fn json_response<T: Serialize>(data: T, status: u16) -> HttpResponse {
        match StatusCode::from_u16(status) {
            Ok(code) => HttpResponse::build(code)
                .content_type("application/json")
                .json(data),
            Err(_) => HttpResponse::InternalServerError()
                .content_type("application/json")
                .json(ApiResponse::status(
                    ResponseStatus::ServerError,
                    ResponseStatus::ServerError.default_message(),
                )),
        }
    }

    pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
        json_response(ApiResponse::success(data), 200)
    }

    pub fn message_response<T: Serialize>(message: &str, data: T) -> HttpResponse {
        json_response(ApiResponse::with_message(message, data), 200)
    }

    /// Success envelope carrying only a message.
    pub fn notice_response(message: &str) -> HttpResponse {
        json_response(ApiResponse::status(ResponseStatus::Success, message), 200)
    }

    pub fn created_response<T: Serialize>(message: &str, data: T) -> HttpResponse {
        json_response(ApiResponse::with_message(message, data), 201)
    }

    pub fn error_response(status: ResponseStatus, message: &str) -> HttpResponse {
        json_response(ApiResponse::status(status, message), status.http_status())
    }

    pub fn validation_error_response(errors: &[String]) -> HttpResponse {
        error_response(
            ResponseStatus::ValidationError,
            &format!("Invalid values in parameters, {}", errors.join(", ")),
        )
    }
}

/// Log internal error details and persist a sanitized record to `errorLogs`.
pub async fn log_internal_error(
    store: Arc<dyn DocumentStore>,
    severity: &str,
    category: &str,
    message: &str,
    details: Option<Value>,
    user_id: Option<String>,
) -> Result<uuid::Uuid, crate::database::StoreError> {
    let sanitized = details.map(sanitize_details);

    log::error!(
        "[{}] {}: {} - details: {:?} user_id: {:?}",
        severity,
        category,
        message,
        sanitized,
        user_id
    );

    let mut record = Map::new();
    record.insert("severity".into(), Value::String(severity.to_string()));
    record.insert("category".into(), Value::String(category.to_string()));
    record.insert("message".into(), Value::String(truncate_string(message, 1024)));
    record.insert("details".into(), sanitized.unwrap_or(Value::Null));
    record.insert("userId".into(), user_id.map(Value::String).unwrap_or(Value::Null));
    let doc = store.insert_one(ERROR_LOG_COLLECTION, record).await?;
    Ok(doc.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Filter, MemoryStore};
    use serde_json::json;

    #[test]
    fn masks_emails_and_tokens() {
        assert_eq!(mask_sensitive("alice@example.com"), "al***@example.com");
        assert_eq!(mask_sensitive("a@b.io"), "a***@b.io");
        assert_eq!(mask_sensitive("abc"), "a***");
        assert_eq!(mask_sensitive("abcdefghijkl"), "abcd***ijkl");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_string("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_string("short", 10), "short");
    }

    #[test]
    fn sanitize_walks_nested_values() {
        let out = sanitize_details(json!({
            "user": {"email": "alice@example.com", "otp": 123456},
            "items": [{"password": "hunter22"}]
        }));
        assert_eq!(out["user"]["email"], json!("al***@example.com"));
        assert_eq!(out["user"]["otp"], json!("***"));
        assert_eq!(out["items"][0]["password"], json!("hunt***er22"));
    }

    #[test]
    fn error_status_mapping() {
        use error::AppError;
        assert_eq!(AppError::validation("x").status().http_status(), 422);
        assert_eq!(AppError::not_found().status().http_status(), 404);
        let err = AppError::internal("db exploded");
        assert!(err.is_internal());
        assert_eq!(err.public_message(), "Internal server error.");
        let err: AppError = crate::database::FilterError::NotAnObject.into();
        assert_eq!(err.status().http_status(), 422);
    }

    #[tokio::test]
    async fn internal_errors_are_persisted_sanitized() {
        let store = Arc::new(MemoryStore::new());
        let id = log_internal_error(
            store.clone(),
            "ERROR",
            "login",
            "boom",
            Some(json!({"password": "secret-value"})),
            None,
        )
        .await
        .unwrap();
        let doc = store
            .find_one(ERROR_LOG_COLLECTION, &Filter::id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("details"), Some(&json!({"password": "secr***alue"})));
    }
}
