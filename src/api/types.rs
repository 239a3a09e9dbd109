use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

use crate::account::{AccountSummary, SubscriptionTier};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Please include a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Please enter a password with 6 or more characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Please include a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Kept as text so an unknown tier is reported against the field.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateSubscriptionRequest {
    #[validate(custom = "validate_tier")]
    pub subscription: String,
}

impl UpdateSubscriptionRequest {
    pub fn new(tier: SubscriptionTier) -> Self {
        Self {
            subscription: tier.to_string(),
        }
    }

    pub fn tier(&self) -> Result<SubscriptionTier, String> {
        self.subscription.parse()
    }
}

fn validate_tier(value: &str) -> Result<(), ValidationError> {
    value.parse::<SubscriptionTier>().map(|_| ()).map_err(|_| {
        let mut error = ValidationError::new("subscription");
        error.message = Some(Cow::from("Subscription must be 'free' or 'premium'"));
        error
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AccountSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub message: String,
    pub user: AccountSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub subscription: SubscriptionTier,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub api_key: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub count: u32,
    /// `None` for premium accounts.
    pub remaining: Option<u32>,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
}
