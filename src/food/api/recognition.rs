use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, info};
use reqwest::Client;
use std::io::ErrorKind;
use std::sync::Arc;
use thiserror::Error;

use crate::food::analysis::nutrition::parse_recognition_payload;
use crate::food::analysis::RecognitionResult;
use crate::food::config::FoodConfig;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Permission denied reading image {0}")]
    PermissionDenied(String),
    #[error("Could not read image {path}: {reason}")]
    ImageRead { path: String, reason: String },
    #[error("{0} is not a supported image")]
    NotAnImage(String),
    #[error("Recognition credential unavailable: {0}")]
    Credential(String),
    #[error("Failed to send request: {0}")]
    Transport(String),
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Malformed(String),
}

impl RecognitionError {
    /// Whether trying the same image again might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RecognitionError::PermissionDenied(_) | RecognitionError::NotAnImage(_)
        )
    }
}

/// Image-to-nutrition inference boundary.
#[async_trait]
pub trait FoodRecognizer: Send + Sync {
    async fn recognize(&self, image_reference: &str) -> Result<RecognitionResult, RecognitionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionCredential {
    pub api_key: String,
    pub host: String,
}

/// Supplies the key used to call the recognition service.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<RecognitionCredential, RecognitionError>;
}

/// Fixed key taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub RecognitionCredential);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<RecognitionCredential, RecognitionError> {
        Ok(self.0.clone())
    }
}

pub struct RecognitionClient {
    client: Client,
    url: String,
    language: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl RecognitionClient {
    pub fn new(config: &FoodConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: Client::new(),
            url: config.recognition_url.clone(),
            language: config.language.clone(),
            credentials,
        }
    }

    /// Strips a `file://` prefix so URIs and plain paths both work.
    fn local_path(image_reference: &str) -> &str {
        image_reference.strip_prefix("file://").unwrap_or(image_reference)
    }

    async fn encode_image(image_reference: &str) -> Result<String, RecognitionError> {
        let path = Self::local_path(image_reference);
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => RecognitionError::PermissionDenied(path.to_string()),
            _ => RecognitionError::ImageRead {
                path: path.to_string(),
                reason: e.to_string(),
            },
        })?;

        if image::guess_format(&bytes).is_err() {
            return Err(RecognitionError::NotAnImage(path.to_string()));
        }

        Ok(BASE64.encode(bytes))
    }
}

#[async_trait]
impl FoodRecognizer for RecognitionClient {
    async fn recognize(&self, image_reference: &str) -> Result<RecognitionResult, RecognitionError> {
        let image_base64 = Self::encode_image(image_reference).await?;
        let credential = self.credentials.credential().await?;

        debug!("Sending {} bytes of base64 image to {}", image_base64.len(), self.url);

        let response = self.client
            .post(&self.url)
            .header("X-RapidAPI-Key", &credential.api_key)
            .header("X-RapidAPI-Host", &credential.host)
            .form(&[("lang", self.language.as_str()), ("image_base64", image_base64.as_str())])
            .send()
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result = parse_recognition_payload(&body)
            .map_err(|e| RecognitionError::Malformed(e.to_string()))?;

        info!("Recognized {} dish(es) in {}", result.dishes.len(), image_reference);
        Ok(result)
    }
}
