use serde::Deserialize;

use crate::error::AnalyticsResult;
use crate::types::SubscriptionTier;

/// Root application configuration. Loaded from environment variables
/// with the prefix `VIZSPRINTS__` and an optional TOML file named by
/// `VIZSPRINTS_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub cohort: CohortConfig,
    #[serde(default)]
    pub ab_test: AbTestConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Events buffered between the SQLite cursor thread and the aggregator.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    /// Event names of the product funnel, entry stage first.
    #[serde(default = "default_funnel_stages")]
    pub stages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_active_window_days")]
    pub active_window_days: i64,
    #[serde(default = "default_conversion_event")]
    pub conversion_event: String,
    #[serde(default)]
    pub tier_prices: TierPrices,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierPrices {
    #[serde(default)]
    pub free: f64,
    #[serde(default = "default_premium_price")]
    pub premium: f64,
    #[serde(default = "default_enterprise_price")]
    pub enterprise: f64,
}

impl TierPrices {
    pub fn price(&self, tier: SubscriptionTier) -> f64 {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Premium => self.premium,
            SubscriptionTier::Enterprise => self.enterprise,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: i64,
    #[serde(default = "default_session_limit")]
    pub default_limit: usize,
    /// Duration credited to a session made of a single event.
    #[serde(default = "default_single_event_minutes")]
    pub single_event_minutes: i64,
    #[serde(default = "default_session_active_window_days")]
    pub active_window_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortConfig {
    #[serde(default = "default_cohort_max_months")]
    pub max_months: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbTestConfig {
    #[serde(default = "default_confidence_level")]
    pub default_confidence_level: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Page size of the raw event listing.
    #[serde(default = "default_listing_max_events")]
    pub max_events: usize,
}

// Default functions
fn default_database_path() -> String {
    "backend/database/vizsprints.db".to_string()
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_funnel_stages() -> Vec<String> {
    [
        "signup_success",
        "view_dashboard",
        "start_project",
        "complete_task",
        "invite_user",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_active_window_days() -> i64 {
    30
}
fn default_conversion_event() -> String {
    "complete_task".to_string()
}
fn default_premium_price() -> f64 {
    29.0
}
fn default_enterprise_price() -> f64 {
    99.0
}
fn default_session_timeout_minutes() -> i64 {
    30
}
fn default_session_limit() -> usize {
    100
}
fn default_single_event_minutes() -> i64 {
    1
}
fn default_session_active_window_days() -> i64 {
    7
}
fn default_cohort_max_months() -> u32 {
    12
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_listing_max_events() -> usize {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            stages: default_funnel_stages(),
        }
    }
}

impl Default for TierPrices {
    fn default() -> Self {
        Self {
            free: 0.0,
            premium: default_premium_price(),
            enterprise: default_enterprise_price(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            active_window_days: default_active_window_days(),
            conversion_event: default_conversion_event(),
            tier_prices: TierPrices::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
            default_limit: default_session_limit(),
            single_event_minutes: default_single_event_minutes(),
            active_window_days: default_session_active_window_days(),
        }
    }
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            max_months: default_cohort_max_months(),
        }
    }
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            default_confidence_level: default_confidence_level(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_events: default_listing_max_events(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            funnel: FunnelConfig::default(),
            metrics: MetricsConfig::default(),
            sessions: SessionConfig::default(),
            cohort: CohortConfig::default(),
            ab_test: AbTestConfig::default(),
            listing: ListingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> AnalyticsResult<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("VIZSPRINTS_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("VIZSPRINTS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("funnel.stages"),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
