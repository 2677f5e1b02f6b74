//! Registration, login, OTP and token lifecycle.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use validator::Validate;

use crate::auth::{AuthService, AuthUser};
use crate::database::{format_time, Document, DocumentStore, FieldOp, Filter};
use crate::models::resource::{self, USER_SECRET_FIELDS};
use crate::models::schema::{self, Mode};
use crate::models::{
    ImportedUser, LoginRequest, OtpRequest, RegisterRequest, ResetPasswordRequest,
};
use crate::services::google::GoogleTokenVerifier;
use crate::services::notification::NotificationService;
use crate::services::resource::visible;
use crate::utils::error::AppError;
use crate::utils::flatten_validation_errors;

pub const USERS: &str = "user";
pub const OTPS: &str = "otp";
pub const USER_TOKENS: &str = "userTokens";

/// `userType` of accounts created through the app.
pub const APP_USER_TYPE: i64 = 1;

const OTP_SEND_FAILED: &str = "otp can not be sent due to some issue try again later";
const OTP_EXPIRED: &str = "Your reset password link is expired or invalid";

fn present_user(doc: Document) -> Map<String, Value> {
    let mut map = doc.into_json();
    for field in USER_SECRET_FIELDS {
        map.remove(*field);
    }
    map
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn validation_failed(err: &validator::ValidationErrors) -> AppError {
    AppError::validation(format!(
        "Invalid values in parameters, {}",
        flatten_validation_errors(err).join(", ")
    ))
}

/// Outcome of checking a code stored on a user or an `otp` document.
enum CodeCheck {
    Valid,
    Missing,
    Expired,
}

fn check_code(doc: &Document, code_key: &str, expiry_key: &str) -> CodeCheck {
    let (code, expiry) = match code_key.split_once('.') {
        Some((outer, inner)) => {
            let nested = doc.get(outer).and_then(Value::as_object);
            (
                nested.and_then(|m| m.get(inner)).and_then(Value::as_str),
                nested
                    .and_then(|m| m.get(expiry_key))
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()),
            )
        }
        None => (
            doc.get_str(code_key),
            doc.get_str(expiry_key)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()),
        ),
    };
    match (code, expiry) {
        (Some(_), Some(expiry)) if expiry.with_timezone(&Utc) >= Utc::now() => CodeCheck::Valid,
        (Some(_), Some(_)) => CodeCheck::Expired,
        _ => CodeCheck::Missing,
    }
}

pub struct UserService {
    pub store: Arc<dyn DocumentStore>,
    auth: Arc<AuthService>,
    notifier: Arc<NotificationService>,
    google: Arc<dyn GoogleTokenVerifier>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<AuthService>,
        notifier: Arc<NotificationService>,
        google: Arc<dyn GoogleTokenVerifier>,
    ) -> Self {
        Self {
            store,
            auth,
            notifier,
            google,
        }
    }

    fn hash_password(&self, password: &str) -> Result<String, AppError> {
        self.auth
            .hash_password(password)
            .map_err(|e| AppError::internal(format!("password hashing failed: {}", e)))
    }

    fn new_otp(&self) -> Result<String, AppError> {
        self.auth
            .generate_otp()
            .map_err(|e| AppError::internal(format!("OS RNG failure: {}", e)))
    }

    fn active_user_filter(filter: Filter) -> Filter {
        visible(filter).with("isActive", FieldOp::Ne(Value::Bool(false)))
    }

    async fn find_user_by_contact(&self, email: Option<&str>, phone: Option<&str>) -> Result<Option<Document>, AppError> {
        let mut branches = Vec::new();
        if let Some(email) = email {
            branches.push(json!({ "email": normalize_email(email) }));
        }
        if let Some(phone) = phone {
            branches.push(json!({ "phone": phone }));
        }
        if branches.is_empty() {
            return Ok(None);
        }
        let filter = visible(Filter::parse(&json!({ "$or": branches }))?);
        Ok(self.store.find_one(USERS, &filter).await?)
    }

    /// Resolve a bearer token to the caller. Unknown, revoked or expired
    /// tokens, and tokens of inactive users, yield `None`.
    pub async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, AppError> {
        let claims = match self.auth.validate_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                log::debug!("Rejected token: {}", e);
                return Ok(None);
            }
        };
        let Ok(user_id) = uuid::Uuid::parse_str(&claims.sub) else {
            return Ok(None);
        };
        let token_hash = self.auth.hash_token(token);
        let filter = Filter::new()
            .eq("tokenHash", token_hash.clone())
            .eq("userId", user_id.to_string())
            .eq("isTokenExpired", false);
        let Some(entry) = self.store.find_one(USER_TOKENS, &filter).await? else {
            return Ok(None);
        };
        if entry.get_time("tokenExpiredTime").map_or(true, |t| t <= Utc::now()) {
            return Ok(None);
        }
        let user = self
            .store
            .find_one(USERS, &Self::active_user_filter(Filter::id(user_id)))
            .await?;
        Ok(user.map(|u| AuthUser {
            id: u.id,
            email: u.get_str("email").map(str::to_string),
            token_hash,
        }))
    }

    /// Sign a token for `user` and record it in `userTokens`.
    async fn issue_session(&self, user: Document) -> Result<Map<String, Value>, AppError> {
        let email = user.get_str("email").unwrap_or_default().to_string();
        let issued = self
            .auth
            .issue_token(&user.id, &email)
            .map_err(|e| AppError::internal(format!("token signing failed: {}", e)))?;
        let mut entry = Map::new();
        entry.insert("userId".into(), Value::String(user.id.to_string()));
        entry.insert("tokenHash".into(), Value::String(self.auth.hash_token(&issued.token)));
        entry.insert("tokenExpiredTime".into(), Value::String(format_time(&issued.expires_at)));
        entry.insert("isTokenExpired".into(), Value::Bool(false));
        self.store.insert_one(USER_TOKENS, entry).await?;

        let mut out = present_user(user);
        out.insert("token".into(), Value::String(issued.token));
        Ok(out)
    }

    async fn ensure_unique(&self, field: &str, value: &str, taken: &HashSet<String>) -> Result<(), AppError> {
        let existing = self
            .store
            .find_one(USERS, &Filter::new().eq(field, value.to_string()))
            .await?;
        if existing.is_some() || taken.contains(value) {
            return Err(AppError::validation(format!(
                "{} already exists.Unique {} are allowed.",
                value, field
            )));
        }
        Ok(())
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<Map<String, Value>, AppError> {
        let email = non_empty(req.email.as_ref()).map(normalize_email);
        let phone = non_empty(req.phone.as_ref()).map(str::to_string);
        if email.is_none() && phone.is_none() {
            return Err(AppError::bad_request(
                "Insufficient request parameters! email or phone  is required.",
            ));
        }
        req.validate().map_err(|e| validation_failed(&e))?;

        let mut body = crate::database::strip_reserved(req.profile.clone());
        for field in USER_SECRET_FIELDS {
            body.remove(*field);
        }
        let user_fields = resource::find(USERS).map(|r| r.fields).unwrap_or(&[]);
        schema::validate(user_fields, &body, Mode::Create)
            .map_err(|errs| AppError::validation(format!("Invalid values in parameters, {}", errs.join(", "))))?;

        if let Some(otp) = non_empty(req.otp.as_ref()) {
            let filter = visible(Filter::new().eq("code", otp).eq("isActive", true));
            let found = self.store.find_one(OTPS, &filter).await?;
            let Some(found) = found else {
                return Err(AppError::failure("Invalid OTP"));
            };
            match check_code(&found, "code", "expireTime") {
                CodeCheck::Valid => {}
                CodeCheck::Missing => return Err(AppError::failure("Invalid OTP")),
                CodeCheck::Expired => return Err(AppError::failure(OTP_EXPIRED)),
            }
            self.store.delete_one(OTPS, &Filter::id(found.id)).await?;
        }

        let none = HashSet::new();
        if let Some(email) = &email {
            self.ensure_unique("email", email, &none).await?;
        }
        if let Some(phone) = &phone {
            self.ensure_unique("phone", phone, &none).await?;
        }

        if let Some(email) = &email {
            body.insert("email".into(), Value::String(email.clone()));
        }
        if let Some(phone) = &phone {
            body.insert("phone".into(), Value::String(phone.clone()));
        }
        if let Some(password) = non_empty(req.password.as_ref()) {
            body.insert("password".into(), Value::String(self.hash_password(password)?));
        }
        body.insert("userType".into(), Value::from(APP_USER_TYPE));
        body.insert("isActive".into(), Value::Bool(true));
        body.insert("isDeleted".into(), Value::Bool(false));
        body.insert("loginRetryLimit".into(), Value::from(0));

        let user = self.store.insert_one(USERS, body).await?;
        log::info!("Registered user {}", user.id);

        let name = user
            .get_str("full_name")
            .or_else(|| user.get_str("name"))
            .unwrap_or("there")
            .to_string();
        self.notifier
            .send_welcome(email.as_deref(), phone.as_deref(), &name)
            .await;
        Ok(present_user(user))
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Map<String, Value>, AppError> {
        let username = req.username.trim();
        if username.is_empty() {
            return Err(AppError::bad_request("Insufficient request parameters! username  is required."));
        }
        let password = non_empty(req.password.as_ref());
        let otp = non_empty(req.otp.as_ref());
        if password.is_none() && otp.is_none() {
            return Err(AppError::bad_request(
                "Insufficient request parameters! password or otp is required.",
            ));
        }

        let lookup = if username.contains('@') {
            self.find_user_by_contact(Some(username), None).await?
        } else {
            self.find_user_by_contact(None, Some(username)).await?
        };

        if let Some(otp) = otp {
            let user = match &lookup {
                Some(user) if user.get_bool("isActive") != Some(false) => user,
                _ => return Err(AppError::failure("Invalid Otp")),
            };
            let stored = user
                .get("resetPasswordLink")
                .and_then(|l| l.get("code"))
                .and_then(Value::as_str);
            if stored != Some(otp) {
                return Err(AppError::failure("Invalid Otp"));
            }
            match check_code(user, "resetPasswordLink.code", "expireTime") {
                CodeCheck::Valid => {}
                CodeCheck::Missing => return Err(AppError::failure("Invalid Otp")),
                CodeCheck::Expired => return Err(AppError::failure("Your Otp is expired or invalid")),
            }
            self.clear_reset_link(user).await?;
        }

        let Some(mut user) = lookup else {
            return Err(AppError::bad_request("User not exists"));
        };
        if user.get_bool("isActive") == Some(false) {
            return Err(AppError::bad_request("You are blocked by Admin please contact to Admin."));
        }

        user = self.check_lockout(user).await?;

        if otp.is_none() {
            let password = password.unwrap_or_default();
            let matched = match user.get_str("password") {
                Some(hash) => self.auth.verify_password(password, hash).unwrap_or(false),
                None => false,
            };
            if !matched {
                self.record_failed_attempt(&user).await?;
                return Err(AppError::bad_request("Incorrect Password"));
            }
        }

        if user.get_i64("loginRetryLimit").unwrap_or(0) != 0 {
            user = self.reset_lockout(&user).await?.unwrap_or(user);
        }
        self.issue_session(user).await
    }

    async fn clear_reset_link(&self, user: &Document) -> Result<(), AppError> {
        let mut patch = Map::new();
        patch.insert("resetPasswordLink".into(), Value::Object(Map::new()));
        self.store.update_one(USERS, &Filter::id(user.id), &patch).await?;
        Ok(())
    }

    fn reactive_minutes(&self) -> i64 {
        self.auth.config().login_reactive_minutes
    }

    /// Refuse locked accounts; unlock those whose lock has passed.
    async fn check_lockout(&self, user: Document) -> Result<Document, AppError> {
        let limit = self.auth.config().max_login_retry_limit;
        if user.get_i64("loginRetryLimit").unwrap_or(0) < limit {
            return Ok(user);
        }
        let now = Utc::now();
        match user.get_time("loginReactiveTime") {
            Some(until) if until > now => {
                let minutes = (until - now).num_minutes() + 1;
                Err(AppError::bad_request(format!(
                    "you have exceed the number of limit.you can login after {} minutes.",
                    minutes
                )))
            }
            Some(_) => Ok(self.reset_lockout(&user).await?.unwrap_or(user)),
            None => {
                let until = now + Duration::minutes(self.reactive_minutes());
                let mut patch = Map::new();
                patch.insert("loginReactiveTime".into(), Value::String(format_time(&until)));
                self.store.update_one(USERS, &Filter::id(user.id), &patch).await?;
                Err(AppError::bad_request(format!(
                    "you have exceed the number of limit.you can login after {} minutes.",
                    self.reactive_minutes()
                )))
            }
        }
    }

    async fn reset_lockout(&self, user: &Document) -> Result<Option<Document>, AppError> {
        let mut patch = Map::new();
        patch.insert("loginRetryLimit".into(), Value::from(0));
        patch.insert("loginReactiveTime".into(), Value::Null);
        Ok(self.store.update_one(USERS, &Filter::id(user.id), &patch).await?)
    }

    async fn record_failed_attempt(&self, user: &Document) -> Result<(), AppError> {
        let attempts = user.get_i64("loginRetryLimit").unwrap_or(0) + 1;
        let mut patch = Map::new();
        patch.insert("loginRetryLimit".into(), Value::from(attempts));
        if attempts >= self.auth.config().max_login_retry_limit {
            let until = Utc::now() + Duration::minutes(self.reactive_minutes());
            patch.insert("loginReactiveTime".into(), Value::String(format_time(&until)));
            log::warn!("User {} locked after {} failed logins", user.id, attempts);
        }
        self.store.update_one(USERS, &Filter::id(user.id), &patch).await?;
        Ok(())
    }

    fn otp_contacts(req: &OtpRequest) -> Result<(Option<String>, Option<String>), AppError> {
        req.validate().map_err(|e| validation_failed(&e))?;
        let email = non_empty(req.email.as_ref()).map(normalize_email);
        let phone = non_empty(req.phone.as_ref()).map(str::to_string);
        if email.is_none() && phone.is_none() {
            return Err(AppError::bad_request(
                "Insufficient request parameters! email or phone is required.",
            ));
        }
        Ok((email, phone))
    }

    fn delivery_message(&self, delivery: crate::services::notification::OtpDelivery) -> Result<&'static str, AppError> {
        delivery.message().ok_or_else(|| AppError::failure(OTP_SEND_FAILED))
    }

    /// Send a registration OTP to a contact that has no account yet.
    pub async fn send_register_otp(&self, req: OtpRequest) -> Result<&'static str, AppError> {
        let (email, phone) = Self::otp_contacts(&req)?;
        if self
            .find_user_by_contact(email.as_deref(), phone.as_deref())
            .await?
            .is_some()
        {
            return Err(AppError::failure("User is Already Exist"));
        }
        let code = self.new_otp()?;
        let mut body = Map::new();
        body.insert("code".into(), Value::String(code.clone()));
        body.insert("expireTime".into(), Value::String(format_time(&self.auth.otp_expiry())));
        if let Some(email) = &email {
            body.insert("email".into(), Value::String(email.clone()));
        }
        if let Some(phone) = &phone {
            body.insert("phone".into(), Value::String(phone.clone()));
        }
        body.insert("isActive".into(), Value::Bool(true));
        body.insert("isDeleted".into(), Value::Bool(false));
        self.store.insert_one(OTPS, body).await?;

        let delivery = self
            .notifier
            .send_otp(email.as_deref(), phone.as_deref(), &code, self.auth.config().otp_expire_minutes)
            .await;
        self.delivery_message(delivery)
    }

    /// Store a fresh code on an existing user and send it. Used for OTP login
    /// and password reset alike.
    pub async fn send_user_otp(&self, req: OtpRequest) -> Result<&'static str, AppError> {
        let (email, phone) = Self::otp_contacts(&req)?;
        let user = self
            .find_user_by_contact(email.as_deref(), phone.as_deref())
            .await?
            .filter(|u| u.get_bool("isActive") != Some(false))
            .ok_or_else(AppError::not_found)?;
        let code = self.new_otp()?;
        let mut patch = Map::new();
        patch.insert(
            "resetPasswordLink".into(),
            json!({ "code": code, "expireTime": format_time(&self.auth.otp_expiry()) }),
        );
        self.store.update_one(USERS, &Filter::id(user.id), &patch).await?;

        let delivery = self
            .notifier
            .send_otp(
                user.get_str("email"),
                user.get_str("phone"),
                &code,
                self.auth.config().otp_expire_minutes,
            )
            .await;
        self.delivery_message(delivery)
    }

    async fn find_by_reset_code(&self, code: &str, invalid: &'static str) -> Result<Document, AppError> {
        let filter = Self::active_user_filter(Filter::new().eq("resetPasswordLink.code", code));
        let user = self
            .store
            .find_one(USERS, &filter)
            .await?
            .ok_or_else(|| AppError::failure(invalid))?;
        match check_code(&user, "resetPasswordLink.code", "expireTime") {
            CodeCheck::Valid => Ok(user),
            CodeCheck::Missing => Err(AppError::failure(invalid)),
            CodeCheck::Expired => Err(AppError::failure(OTP_EXPIRED)),
        }
    }

    pub async fn validate_otp(&self, otp: &str) -> Result<(), AppError> {
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(AppError::bad_request("Insufficient request parameters! otp is required."));
        }
        let user = self.find_by_reset_code(otp, "Invalid OTP").await?;
        self.clear_reset_link(&user).await
    }

    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AppError> {
        if req.code.trim().is_empty() || req.new_password.is_empty() {
            return Err(AppError::bad_request(
                "Insufficient request parameters! code and newPassword is required.",
            ));
        }
        req.validate().map_err(|e| validation_failed(&e))?;
        let user = self.find_by_reset_code(req.code.trim(), "Invalid Code").await?;
        let mut patch = Map::new();
        patch.insert("password".into(), Value::String(self.hash_password(&req.new_password)?));
        patch.insert("resetPasswordLink".into(), Value::Object(Map::new()));
        patch.insert("loginRetryLimit".into(), Value::from(0));
        patch.insert("loginReactiveTime".into(), Value::Null);
        self.store.update_one(USERS, &Filter::id(user.id), &patch).await?;
        log::info!("Password reset for user {}", user.id);
        Ok(())
    }

    /// Expire the token the caller authenticated with.
    pub async fn logout(&self, caller: &AuthUser) -> Result<(), AppError> {
        let filter = Filter::new()
            .eq("tokenHash", caller.token_hash.clone())
            .eq("userId", caller.id_string());
        let mut patch = Map::new();
        patch.insert("isTokenExpired".into(), Value::Bool(true));
        self.store
            .update_one(USER_TOKENS, &filter, &patch)
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(())
    }

    /// Bulk import. The whole batch is rejected if any entry is invalid.
    pub async fn store_multiple(&self, users: Vec<ImportedUser>) -> Result<Vec<Map<String, Value>>, AppError> {
        if users.is_empty() {
            return Err(AppError::bad_request("Invalid input. Expected an array of user objects."));
        }
        let mut taken = HashSet::new();
        let mut bodies = Vec::with_capacity(users.len());
        for user in users {
            let email = non_empty(user.email.as_ref()).map(normalize_email);
            let full_name = non_empty(user.full_name.as_ref()).map(str::to_string);
            let password = match &user.password {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Null) | None => None,
                Some(Value::String(_)) => None,
                Some(_) => return Err(AppError::validation("Password must be a string.")),
            };
            let (Some(email), Some(full_name), Some(password)) = (email, full_name, password) else {
                return Err(AppError::validation(
                    "Missing required fields: full_name, email, or password.",
                ));
            };
            self.ensure_unique("email", &email, &taken).await?;
            taken.insert(email.clone());

            let mut body = crate::database::strip_reserved(user.profile);
            for field in USER_SECRET_FIELDS {
                body.remove(*field);
            }
            body.insert("full_name".into(), Value::String(full_name));
            body.insert("email".into(), Value::String(email));
            body.insert("password".into(), Value::String(self.hash_password(&password)?));
            body.insert("userType".into(), Value::from(APP_USER_TYPE));
            body.insert("isActive".into(), Value::Bool(true));
            body.insert("isDeleted".into(), Value::Bool(false));
            body.insert("loginRetryLimit".into(), Value::from(0));
            bodies.push(body);
        }
        let docs = self.store.insert(USERS, bodies).await?;
        log::info!("Imported {} users", docs.len());
        Ok(docs.into_iter().map(present_user).collect())
    }

    /// Find or create the account behind a Google ID token and sign it in.
    pub async fn google_login(&self, credentials: &str) -> Result<Map<String, Value>, AppError> {
        let credentials = credentials.trim();
        if credentials.is_empty() {
            return Err(AppError::bad_request("Insufficient credentials"));
        }
        let profile = self.google.verify(credentials).await.map_err(|e| {
            log::warn!("Google login rejected: {}", e);
            AppError::unauthorized("Invalid Google credentials")
        })?;
        let email = normalize_email(&profile.email);
        let user = match self.find_user_by_contact(Some(&email), None).await? {
            Some(user) => user,
            None => {
                let mut body = Map::new();
                body.insert(
                    "full_name".into(),
                    profile.name.map(Value::String).unwrap_or(Value::Null),
                );
                body.insert("email".into(), Value::String(email));
                body.insert(
                    "avatar".into(),
                    profile.picture.map(Value::String).unwrap_or(Value::Null),
                );
                body.insert("userType".into(), Value::from(APP_USER_TYPE));
                body.insert("isActive".into(), Value::Bool(true));
                body.insert("isDeleted".into(), Value::Bool(false));
                body.insert("loginRetryLimit".into(), Value::from(0));
                let user = self.store.insert_one(USERS, body).await?;
                log::info!("Created user {} from Google login", user.id);
                user
            }
        };
        if user.get_bool("isActive") == Some(false) {
            return Err(AppError::bad_request("You are blocked by Admin please contact to Admin."));
        }
        self.issue_session(user).await
    }

    /// Remove revoked and expired token entries.
    pub async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        let now = format_time(&Utc::now());
        let filter = Filter::parse(&json!({
            "$or": [
                { "isTokenExpired": true },
                { "tokenExpiredTime": { "$lt": now } }
            ]
        }))?;
        Ok(self.store.delete_many(USER_TOKENS, &filter).await?)
    }
}
