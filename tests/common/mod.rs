#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use eventapp_server::app::AppState;
use eventapp_server::auth::AuthService;
use eventapp_server::config::{AuthConfig, SecurityConfig};
use eventapp_server::database::{DocumentStore, MemoryStore};
use eventapp_server::services::google::{GoogleError, GoogleProfile, GoogleTokenVerifier};
use eventapp_server::services::notification::{
    EmailMessage, EmailSender, NotifyError, PushMessage, PushSender, SmsMessage, SmsSender,
};
use eventapp_server::services::NotificationService;

/// Send a `TestRequest` and return the status with the JSON body.
#[macro_export]
macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = actix_web::test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body = actix_web::test::read_body(resp).await;
        (
            status,
            serde_json::from_slice::<serde_json::Value>(&body).unwrap_or(serde_json::Value::Null),
        )
    }};
}

/// Records everything the app tried to deliver.
#[derive(Default)]
pub struct Outbox {
    pub emails: Mutex<Vec<EmailMessage>>,
    pub sms: Mutex<Vec<SmsMessage>>,
    pub pushes: Mutex<Vec<PushMessage>>,
}

fn six_digits(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(6)
        .find(|w| w.iter().all(char::is_ascii_digit))
        .map(|w| w.iter().collect())
}

impl Outbox {
    /// Code carried by the most recent OTP email or SMS.
    pub fn last_otp(&self) -> Option<String> {
        let from_email = self
            .emails
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|m| six_digits(&m.html));
        from_email.or_else(|| self.sms.lock().unwrap().iter().rev().find_map(|m| six_digits(&m.message)))
    }

    pub fn email_count(&self) -> usize {
        self.emails.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for Outbox {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        self.emails.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl SmsSender for Outbox {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError> {
        self.sms.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl PushSender for Outbox {
    async fn send_push(&self, message: &PushMessage) -> Result<(), NotifyError> {
        if message.token.starts_with("dead") {
            return Err(NotifyError::Rejected {
                status: 404,
                body: "NotRegistered".into(),
            });
        }
        self.pushes.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub const GOOGLE_TOKEN: &str = "valid-google-id-token";

/// Accepts exactly `GOOGLE_TOKEN`.
pub struct FakeGoogle;

#[async_trait]
impl GoogleTokenVerifier for FakeGoogle {
    async fn verify(&self, id_token: &str) -> Result<GoogleProfile, GoogleError> {
        if id_token == GOOGLE_TOKEN {
            Ok(GoogleProfile {
                email: "Guest@Example.com".into(),
                name: Some("Guest User".into()),
                picture: Some("https://example.com/g.png".into()),
            })
        } else {
            Err(GoogleError::Invalid("bad token".into()))
        }
    }
}

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "test_secret_must_be_32_chars_long!!".into(),
        jwt_expires_in_seconds: 3600,
        bcrypt_cost: 4,
        otp_expire_minutes: 10,
        max_login_retry_limit: 3,
        login_reactive_minutes: 20,
        google_client_id: None,
    }
}

pub fn security_config(rate_limit_requests: u32) -> SecurityConfig {
    SecurityConfig {
        cors_allowed_origins: vec!["http://localhost:3000".into()],
        rate_limit_requests,
        rate_limit_window_seconds: 60,
        max_request_size_bytes: 64 * 1024,
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<dyn DocumentStore>,
    pub outbox: Arc<Outbox>,
}

pub fn context() -> TestContext {
    context_with(security_config(1000))
}

pub fn context_with(security: SecurityConfig) -> TestContext {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let outbox = Arc::new(Outbox::default());
    let notifier = Arc::new(NotificationService::new(
        outbox.clone(),
        outbox.clone(),
        outbox.clone(),
    ));
    let state = AppState::new(
        Arc::clone(&store),
        Arc::new(AuthService::new(auth_config())),
        notifier,
        Arc::new(FakeGoogle),
        security,
    );
    TestContext { state, store, outbox }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl TestContext {
    /// Register `email` with `password` and return `(user id, token)`.
    pub async fn signed_in(&self, email: &str, password: &str) -> (String, String) {
        let req = serde_json::from_value(serde_json::json!({
            "email": email,
            "password": password,
            "full_name": "Test User"
        }))
        .unwrap();
        let user = self.state.users.register(req).await.unwrap();
        let login = serde_json::from_value(serde_json::json!({
            "username": email,
            "password": password
        }))
        .unwrap();
        let session = self.state.users.login(login).await.unwrap();
        (
            user["id"].as_str().unwrap().to_string(),
            session["token"].as_str().unwrap().to_string(),
        )
    }
}
