//! `/auth` routes: registration, login, OTP and token lifecycle.

use actix_web::{web, HttpResponse};
use serde_json::Value;
use std::sync::Arc;

use super::report;
use crate::auth::AuthUser;
use crate::models::{
    GoogleLoginRequest, ImportedUser, LoginRequest, OtpRequest, RegisterRequest,
    ResetPasswordRequest, ValidateOtpRequest,
};
use crate::services::UserService;
use crate::utils::{error::AppError, response};

type Users = web::Data<Arc<UserService>>;
type HandlerResult = Result<HttpResponse, AppError>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/register", web::post().to(register))
        .route("/login", web::post().to(login))
        .route("/register-otp", web::post().to(register_otp))
        .route("/login-otp", web::post().to(send_user_otp))
        .route("/reset-password-otp", web::post().to(send_user_otp))
        .route("/validate-otp", web::post().to(validate_otp))
        .route("/reset-password", web::put().to(reset_password))
        .route("/logout", web::post().to(logout))
        .route("/store-multiple", web::post().to(store_multiple))
        .route("/firebase/google", web::post().to(google_login))
        .route("/google", web::post().to(google_login));
}

pub async fn register(users: Users, body: web::Json<RegisterRequest>) -> HandlerResult {
    let user = users
        .register(body.into_inner())
        .await
        .map_err(report(Arc::clone(&users.store), "register", None))?;
    Ok(response::success_response(user))
}

pub async fn login(users: Users, body: web::Json<LoginRequest>) -> HandlerResult {
    let session = users
        .login(body.into_inner())
        .await
        .map_err(report(Arc::clone(&users.store), "login", None))?;
    Ok(response::message_response("Login Successful", session))
}

pub async fn register_otp(users: Users, body: web::Json<OtpRequest>) -> HandlerResult {
    let message = users
        .send_register_otp(body.into_inner())
        .await
        .map_err(report(Arc::clone(&users.store), "register_otp", None))?;
    Ok(response::notice_response(message))
}

/// Shared by `/login-otp` and `/reset-password-otp`.
pub async fn send_user_otp(users: Users, body: web::Json<OtpRequest>) -> HandlerResult {
    let message = users
        .send_user_otp(body.into_inner())
        .await
        .map_err(report(Arc::clone(&users.store), "send_user_otp", None))?;
    Ok(response::notice_response(message))
}

pub async fn validate_otp(users: Users, body: web::Json<ValidateOtpRequest>) -> HandlerResult {
    users
        .validate_otp(&body.otp)
        .await
        .map_err(report(Arc::clone(&users.store), "validate_otp", None))?;
    Ok(response::notice_response("OTP verified"))
}

pub async fn reset_password(users: Users, body: web::Json<ResetPasswordRequest>) -> HandlerResult {
    users
        .reset_password(body.into_inner())
        .await
        .map_err(report(Arc::clone(&users.store), "reset_password", None))?;
    Ok(response::notice_response("Password reset successfully"))
}

pub async fn logout(users: Users, caller: AuthUser) -> HandlerResult {
    users
        .logout(&caller)
        .await
        .map_err(report(Arc::clone(&users.store), "logout", Some(caller.id_string())))?;
    Ok(response::notice_response("Logged Out Successfully"))
}

pub async fn store_multiple(users: Users, body: web::Json<Value>) -> HandlerResult {
    const INVALID: &str = "Invalid input. Expected an array of user objects.";
    let entries = match body.into_inner() {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(AppError::bad_request(INVALID)),
    };
    let imported = entries
        .into_iter()
        .map(serde_json::from_value::<ImportedUser>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| AppError::bad_request(INVALID))?;
    let stored = users
        .store_multiple(imported)
        .await
        .map_err(report(Arc::clone(&users.store), "store_multiple", None))?;
    Ok(response::created_response("Users stored successfully", stored))
}

pub async fn google_login(users: Users, body: web::Json<GoogleLoginRequest>) -> HandlerResult {
    let session = users
        .google_login(&body.credentials)
        .await
        .map_err(report(Arc::clone(&users.store), "google_login", None))?;
    Ok(response::message_response("Login Successful", session))
}
