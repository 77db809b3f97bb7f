use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AnalyticsError;

/// Experiment arm a user was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Variant::A),
            "B" | "b" => Ok(Variant::B),
            other => Err(AnalyticsError::invalid(format!("unknown variant '{other}'"))),
        }
    }
}

/// Paid plan of a user; drives the revenue estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Free,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "Free",
            SubscriptionTier::Premium => "Premium",
            SubscriptionTier::Enterprise => "Enterprise",
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Free" => Ok(SubscriptionTier::Free),
            "Premium" => Ok(SubscriptionTier::Premium),
            "Enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(AnalyticsError::invalid(format!(
                "unknown subscription tier '{other}'"
            ))),
        }
    }
}

/// A registered product user. `joined_at` is the signup timestamp used for cohorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub ab_variant: Variant,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub subscription_status: SubscriptionTier,
}

impl User {
    pub fn new(user_id: impl Into<String>, joined_at: DateTime<Utc>, ab_variant: Variant) -> Self {
        Self {
            user_id: user_id.into(),
            joined_at,
            ab_variant,
            device: None,
            country: None,
            subscription_status: SubscriptionTier::Free,
        }
    }

    pub fn with_tier(mut self, tier: SubscriptionTier) -> Self {
        self.subscription_status = tier;
        self
    }
}

/// One immutable instrumentation fact from the raw event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub variant: Option<Variant>,
}

impl Event {
    pub fn new(
        user_id: impl Into<String>,
        event_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_name: event_name.into(),
            timestamp,
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }
}
