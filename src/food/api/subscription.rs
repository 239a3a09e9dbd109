use async_trait::async_trait;
use log::info;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use super::recognition::{CredentialProvider, RecognitionCredential, RecognitionError};
use crate::account::{AccountSummary, SubscriptionTier};
use crate::api::types::{
    ApiResponse, CredentialResponse, LoginRequest, LoginResponse, RegisterRequest, SubscriptionStatus,
    UpdateSubscriptionRequest, UsageResponse, UserResponse,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Failed to reach subscription service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client for the account and subscription service.
pub struct SubscriptionClient {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl SubscriptionClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.read().is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token().ok_or(ClientError::NotLoggedIn)?;
        Ok(request.bearer_auth(token))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let message = match response.json::<ApiResponse>().await {
            Ok(body) => {
                let details: Vec<String> = body.errors.values().flatten().cloned().collect();
                if details.is_empty() {
                    body.message
                } else {
                    format!("{}: {}", body.message, details.join("; "))
                }
            }
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        };

        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<AccountSummary, ClientError> {
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.post(self.endpoint("register")?).json(&body).send().await?;
        let created: UserResponse = Self::decode(response).await?;
        Ok(created.user)
    }

    /// Logs in and keeps the session token for later calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<AccountSummary, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.client.post(self.endpoint("login")?).json(&body).send().await?;
        let login: LoginResponse = Self::decode(response).await?;

        *self.token.write() = Some(login.token);
        info!("Logged in as {}", login.user.email);
        Ok(login.user)
    }

    pub async fn current_user(&self) -> Result<AccountSummary, ClientError> {
        let request = self.authorized(self.client.get(self.endpoint("user")?))?;
        Self::decode(request.send().await?).await
    }

    pub async fn set_subscription(&self, tier: SubscriptionTier) -> Result<AccountSummary, ClientError> {
        let request = self
            .authorized(self.client.put(self.endpoint("subscription")?))?
            .json(&UpdateSubscriptionRequest::new(tier));
        let updated: UserResponse = Self::decode(request.send().await?).await?;
        Ok(updated.user)
    }

    pub async fn upgrade(&self) -> Result<AccountSummary, ClientError> {
        let request = self.authorized(self.client.post(self.endpoint("subscription/upgrade")?))?;
        let upgraded: UserResponse = Self::decode(request.send().await?).await?;
        Ok(upgraded.user)
    }

    pub async fn status(&self) -> Result<SubscriptionStatus, ClientError> {
        let request = self.authorized(self.client.get(self.endpoint("subscription/status")?))?;
        Self::decode(request.send().await?).await
    }

    pub async fn report_usage(&self) -> Result<UsageResponse, ClientError> {
        let request = self.authorized(self.client.post(self.endpoint("usage")?))?;
        Self::decode(request.send().await?).await
    }

    pub async fn recognition_credential(&self) -> Result<CredentialResponse, ClientError> {
        let request = self.authorized(self.client.get(self.endpoint("recognition/credential")?))?;
        Self::decode(request.send().await?).await
    }
}

#[async_trait]
impl CredentialProvider for SubscriptionClient {
    async fn credential(&self) -> Result<RecognitionCredential, RecognitionError> {
        match self.recognition_credential().await {
            Ok(issued) => Ok(RecognitionCredential {
                api_key: issued.api_key,
                host: issued.host,
            }),
            Err(ClientError::Rejected { status, message })
                if status == StatusCode::TOO_MANY_REQUESTS.as_u16() =>
            {
                Err(RecognitionError::Credential(format!("server quota exhausted: {}", message)))
            }
            Err(e) => Err(RecognitionError::Credential(e.to_string())),
        }
    }
}
