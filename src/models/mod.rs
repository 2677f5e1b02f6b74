use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

pub mod resource;
pub mod schema;

pub use resource::{Extension, ListMode, ResourceSpec, UniqueRule};

/// Outcome label carried in every response envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
    ServerError,
    BadRequest,
    RecordNotFound,
    ValidationError,
    Unauthorized,
}

impl ResponseStatus {
    pub fn http_status(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::Failure | Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::RecordNotFound => 404,
            Self::ValidationError => 422,
            Self::ServerError => 500,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            Self::Success => "Your request is successfully executed",
            Self::Failure => "Some error occurred while performing action.",
            Self::ServerError => "Internal server error.",
            Self::BadRequest => "Request parameters are invalid or missing.",
            Self::RecordNotFound => "Record(s) not found with specified criteria.",
            Self::ValidationError => "Invalid Data, Validation Failed.",
            Self::Unauthorized => "You are not authorized to access the request",
        }
    }
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_message(ResponseStatus::Success.default_message(), data)
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<Value> {
    pub fn status(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
        }
    }
}

/// `options` of a list request.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub pagination: Option<bool>,
    pub sort: Value,
    /// `"a b"`, `["a", "b"]` or `{"a": 1}`; `id` is always kept.
    pub select: Value,
}

/// Body of `POST /list`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListRequest {
    pub query: Value,
    pub options: ListOptions,
    pub is_count_only: bool,
}

/// Body of `POST /count`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CountRequest {
    #[serde(rename = "where")]
    pub filter: Value,
}

#[derive(Debug, Deserialize)]
pub struct BulkInsertRequest {
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BulkUpdateRequest {
    pub filter: Value,
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Paging metadata with the labels clients expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Paginator {
    pub item_count: u64,
    pub per_page: u64,
    pub page_count: u64,
    pub current_page: u64,
    pub sl_no: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
    pub prev: Option<u64>,
    pub next: Option<u64>,
}

impl Paginator {
    pub fn new(item_count: u64, page: u64, per_page: u64) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let page_count = item_count.div_ceil(per_page).max(1);
        let has_prev_page = page > 1;
        let has_next_page = page < page_count;
        Self {
            item_count,
            per_page,
            page_count,
            current_page: page,
            sl_no: (page - 1).saturating_mul(per_page).saturating_add(1),
            has_prev_page,
            has_next_page,
            prev: has_prev_page.then(|| page - 1),
            next: has_next_page.then(|| page.saturating_add(1)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated {
    pub data: Vec<Value>,
    pub paginator: Paginator,
}

/// Body of `POST /auth/register`. Extra profile keys are kept.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 6, max = 15, message = "Phone must be 6-15 characters"))]
    pub phone: Option<String>,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: Option<String>,

    pub otp: Option<String>,

    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    pub password: Option<String>,
    pub otp: Option<String>,
}

/// Destination of an OTP.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct OtpRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateOtpRequest {
    #[serde(default)]
    pub otp: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

/// One entry of `POST /auth/store-multiple`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportedUser {
    pub full_name: Option<String>,
    pub email: Option<String>,
    /// Spreadsheets export numeric passwords as numbers.
    pub password: Option<Value>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    #[serde(default)]
    pub credentials: String,
}

/// Body of `POST /notification/push`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}
