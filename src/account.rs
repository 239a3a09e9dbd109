use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Analyses a free account may run per UTC day on the server side.
pub const SERVER_FREE_DAILY_LIMIT: u32 = 5;

/// How long a premium upgrade stays valid.
pub const PREMIUM_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        SubscriptionTier::Free
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Premium => write!(f, "premium"),
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            other => Err(format!("Unknown subscription tier: {}", other)),
        }
    }
}

/// Server-side account record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_expiry: Option<DateTime<Utc>>,
    pub daily_analysis_count: u32,
    pub last_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Account fields that are safe to hand back to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub subscription: SubscriptionTier,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub daily_analysis_count: u32,
}

/// Emails are unique regardless of case and surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl UserAccount {
    pub fn new(email: &str, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            password_hash,
            subscription_tier: SubscriptionTier::Free,
            subscription_expiry: None,
            daily_analysis_count: 0,
            last_reset_at: now,
            created_at: now,
        }
    }

    /// Drops an expired premium subscription back to free. Returns true if
    /// the account changed.
    pub fn lapse_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        match (self.subscription_tier, self.subscription_expiry) {
            (SubscriptionTier::Premium, Some(expiry)) if expiry < now => {
                self.subscription_tier = SubscriptionTier::Free;
                self.subscription_expiry = None;
                true
            }
            _ => false,
        }
    }

    /// Zeroes the daily counter when `now` falls on a later UTC day than the
    /// last reset. Returns true if the account changed.
    pub fn reset_if_new_day(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() != self.last_reset_at.date_naive() {
            self.daily_analysis_count = 0;
            self.last_reset_at = now;
            true
        } else {
            false
        }
    }

    /// Lapse, reset, then check. Callers persist the account afterwards since
    /// the first two steps may have mutated it.
    pub fn has_quota(&mut self, now: DateTime<Utc>) -> bool {
        self.lapse_if_expired(now);
        self.reset_if_new_day(now);

        match self.subscription_tier {
            SubscriptionTier::Premium => true,
            SubscriptionTier::Free => self.daily_analysis_count < SERVER_FREE_DAILY_LIMIT,
        }
    }

    /// Counts one analysis against today's quota.
    pub fn record_analysis(&mut self, now: DateTime<Utc>) {
        self.lapse_if_expired(now);
        self.reset_if_new_day(now);
        self.daily_analysis_count = self.daily_analysis_count.saturating_add(1);
    }

    /// Remaining analyses today; `None` means unlimited.
    pub fn remaining(&self) -> Option<u32> {
        match self.subscription_tier {
            SubscriptionTier::Premium => None,
            SubscriptionTier::Free => {
                Some(SERVER_FREE_DAILY_LIMIT.saturating_sub(self.daily_analysis_count))
            }
        }
    }

    pub fn upgrade(&mut self, now: DateTime<Utc>) {
        self.subscription_tier = SubscriptionTier::Premium;
        self.subscription_expiry = Some(now + Duration::days(PREMIUM_VALIDITY_DAYS));
    }

    pub fn set_tier(&mut self, tier: SubscriptionTier, now: DateTime<Utc>) {
        match tier {
            SubscriptionTier::Premium => {
                if self.subscription_tier != SubscriptionTier::Premium
                    || self.subscription_expiry.is_none()
                {
                    self.upgrade(now);
                }
            }
            SubscriptionTier::Free => {
                self.subscription_tier = SubscriptionTier::Free;
                self.subscription_expiry = None;
            }
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            subscription: self.subscription_tier,
            subscription_end_date: self.subscription_expiry,
            daily_analysis_count: self.daily_analysis_count,
        }
    }
}
