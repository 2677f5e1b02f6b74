use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const TOKEN_INFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Identity asserted by a verified Google ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("token info request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid Google credentials: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait GoogleTokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleProfile, GoogleError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    email: Option<String>,
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies ID tokens against Google's token-info endpoint.
pub struct TokenInfoVerifier {
    client: Client,
    client_id: Option<String>,
}

impl TokenInfoVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, client_id }
    }

    fn profile(&self, info: TokenInfo) -> Result<GoogleProfile, GoogleError> {
        if let Some(expected) = &self.client_id {
            if info.aud.as_deref() != Some(expected.as_str()) {
                return Err(GoogleError::Invalid("audience mismatch".to_string()));
            }
        }
        if info.email_verified.as_deref() == Some("false") {
            return Err(GoogleError::Invalid("email not verified".to_string()));
        }
        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GoogleError::Invalid("token carries no email".to_string()))?;
        Ok(GoogleProfile {
            email,
            name: info.name,
            picture: info.picture,
        })
    }
}

#[async_trait]
impl GoogleTokenVerifier for TokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleProfile, GoogleError> {
        let response = self
            .client
            .get(TOKEN_INFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GoogleError::Invalid(format!("token info returned {}", response.status())));
        }
        let info: TokenInfo = response.json().await?;
        self.profile(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: &str, email: Option<&str>) -> TokenInfo {
        TokenInfo {
            aud: Some(aud.to_string()),
            email: email.map(str::to_string),
            email_verified: Some("true".to_string()),
            name: Some("Ann".to_string()),
            picture: None,
        }
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let verifier = TokenInfoVerifier::new(Some("my-client".into()));
        assert!(verifier.profile(info("other", Some("a@b.io"))).is_err());
        let profile = verifier.profile(info("my-client", Some("a@b.io"))).unwrap();
        assert_eq!(profile.email, "a@b.io");
    }

    #[test]
    fn email_is_required() {
        let verifier = TokenInfoVerifier::new(None);
        assert!(matches!(verifier.profile(info("x", None)), Err(GoogleError::Invalid(_))));
    }
}
