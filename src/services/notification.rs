//! Outbound email, SMS and push delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotificationConfig;

const BREVO_URL: &str = "https://api.brevo.com/v3/smtp/email";
const FAST2SMS_URL: &str = "https://www.fast2sms.com/dev/bulkV2";
const FCM_URL: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} provider is not configured")]
    NotConfigured(&'static str),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected message: {status} {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmsMessage {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Map<String, Value>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(&self, message: &PushMessage) -> Result<(), NotifyError>;
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| Client::new())
}

async fn check(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        status: status.as_u16(),
        body: crate::utils::truncate_string(&body, 256),
    })
}

/// Brevo (Sendinblue) transactional email.
pub struct BrevoEmailSender {
    client: Client,
    api_key: String,
    sender_email: String,
    sender_name: String,
}

impl BrevoEmailSender {
    pub fn new(api_key: String, sender_email: String, sender_name: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            sender_email,
            sender_name,
        }
    }
}

#[async_trait]
impl EmailSender for BrevoEmailSender {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let payload = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": [{ "email": message.to }],
            "subject": message.subject,
            "htmlContent": message.html,
        });
        let response = self
            .client
            .post(BREVO_URL)
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        log::info!("Email sent to {}", crate::utils::mask_sensitive(&message.to));
        Ok(())
    }
}

/// Fast2SMS quick route.
pub struct Fast2SmsSender {
    client: Client,
    api_key: String,
}

impl Fast2SmsSender {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl SmsSender for Fast2SmsSender {
    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError> {
        let payload = json!({
            "route": "q",
            "message": message.message,
            "numbers": message.to,
            "flash": 0,
        });
        let response = self
            .client
            .post(FAST2SMS_URL)
            .header("authorization", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        log::info!("SMS sent to {}", crate::utils::mask_sensitive(&message.to));
        Ok(())
    }
}

/// Firebase Cloud Messaging over the HTTP API.
pub struct FcmPushSender {
    client: Client,
    server_key: String,
}

impl FcmPushSender {
    pub fn new(server_key: String) -> Self {
        Self {
            client: http_client(),
            server_key,
        }
    }
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send_push(&self, message: &PushMessage) -> Result<(), NotifyError> {
        let payload = json!({
            "to": message.token,
            "notification": { "title": message.title, "body": message.body },
            "data": message.data,
        });
        let response = self
            .client
            .post(FCM_URL)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&payload)
            .send()
            .await?;
        check(response).await
    }
}

/// Stand-in for a provider without credentials.
pub struct DisabledSender {
    channel: &'static str,
}

impl DisabledSender {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }

    fn refuse(&self) -> Result<(), NotifyError> {
        log::warn!("{} delivery skipped: provider not configured", self.channel);
        Err(NotifyError::NotConfigured(self.channel))
    }
}

#[async_trait]
impl EmailSender for DisabledSender {
    async fn send_email(&self, _message: &EmailMessage) -> Result<(), NotifyError> {
        self.refuse()
    }
}

#[async_trait]
impl SmsSender for DisabledSender {
    async fn send_sms(&self, _message: &SmsMessage) -> Result<(), NotifyError> {
        self.refuse()
    }
}

#[async_trait]
impl PushSender for DisabledSender {
    async fn send_push(&self, _message: &PushMessage) -> Result<(), NotifyError> {
        self.refuse()
    }
}

/// Which channels carried an OTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OtpDelivery {
    pub email: bool,
    pub sms: bool,
}

impl OtpDelivery {
    /// Success message for the channels used; `None` when nothing went out.
    pub fn message(&self) -> Option<&'static str> {
        match (self.email, self.sms) {
            (true, true) => Some("otp successfully send."),
            (true, false) => Some("otp successfully send to your email."),
            (false, true) => Some("otp successfully send to your mobile number."),
            (false, false) => None,
        }
    }
}

pub struct NotificationService {
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    push: Arc<dyn PushSender>,
}

impl NotificationService {
    pub fn new(email: Arc<dyn EmailSender>, sms: Arc<dyn SmsSender>, push: Arc<dyn PushSender>) -> Self {
        Self { email, sms, push }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        let email: Arc<dyn EmailSender> = match &config.brevo_api_key {
            Some(key) => Arc::new(BrevoEmailSender::new(
                key.clone(),
                config.sender_email.clone(),
                config.sender_name.clone(),
            )),
            None => Arc::new(DisabledSender::new("email")),
        };
        let sms: Arc<dyn SmsSender> = match &config.fast2sms_api_key {
            Some(key) => Arc::new(Fast2SmsSender::new(key.clone())),
            None => Arc::new(DisabledSender::new("sms")),
        };
        let push: Arc<dyn PushSender> = match &config.fcm_server_key {
            Some(key) => Arc::new(FcmPushSender::new(key.clone())),
            None => Arc::new(DisabledSender::new("push")),
        };
        Self::new(email, sms, push)
    }

    /// Send an OTP on every channel the recipient has.
    pub async fn send_otp(&self, email: Option<&str>, phone: Option<&str>, otp: &str, minutes: i64) -> OtpDelivery {
        let mut delivery = OtpDelivery::default();
        if let Some(to) = email {
            let message = EmailMessage {
                to: to.to_string(),
                subject: "Your one-time password".to_string(),
                html: format!(
                    "<p>Your one-time password is <b>{}</b>.</p><p>It expires in {} minutes.</p>",
                    otp, minutes
                ),
            };
            match self.email.send_email(&message).await {
                Ok(()) => delivery.email = true,
                Err(e) => log::warn!("OTP email failed: {}", e),
            }
        }
        if let Some(to) = phone {
            let message = SmsMessage {
                to: to.to_string(),
                message: format!("Your one-time password is {}. It expires in {} minutes.", otp, minutes),
            };
            match self.sms.send_sms(&message).await {
                Ok(()) => delivery.sms = true,
                Err(e) => log::warn!("OTP SMS failed: {}", e),
            }
        }
        delivery
    }

    /// Best-effort greeting after registration.
    pub async fn send_welcome(&self, email: Option<&str>, phone: Option<&str>, name: &str) {
        if let Some(to) = email {
            let message = EmailMessage {
                to: to.to_string(),
                subject: "Welcome".to_string(),
                html: format!(
                    "<p>Hi {},</p><p>Your account has been created.</p>",
                    escape_html(name)
                ),
            };
            if let Err(e) = self.email.send_email(&message).await {
                log::warn!("Welcome email failed: {}", e);
            }
        }
        if let Some(to) = phone {
            let message = SmsMessage {
                to: to.to_string(),
                message: format!("Hi {}, your account has been created.", name),
            };
            if let Err(e) = self.sms.send_sms(&message).await {
                log::warn!("Welcome SMS failed: {}", e);
            }
        }
    }

    pub async fn push(&self, message: &PushMessage) -> Result<(), NotifyError> {
        self.push.send_push(message).await
    }
}

/// Escape text placed inside an HTML body.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
