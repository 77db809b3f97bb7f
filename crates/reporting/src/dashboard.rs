//! Headline dashboard metrics over the user table and the event log.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::config::{MetricsConfig, TierPrices};
use vizsprints_core::{AnalyticsResult, Event, User};

use crate::math::{percentage, round2, safe_div};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_users: u64,
    /// Users with an event inside the active window ending at the latest event.
    pub active_users: u64,
    pub conversion_rate: f64,
    pub revenue: f64,
    pub avg_events_per_user: f64,
    pub total_events: u64,
}

/// Which events and prices drive the dashboard figures.
#[derive(Debug, Clone)]
pub struct MetricsPolicy {
    pub active_window: Duration,
    pub conversion_event: String,
    pub tier_prices: TierPrices,
}

impl From<&MetricsConfig> for MetricsPolicy {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            active_window: Duration::days(config.active_window_days),
            conversion_event: config.conversion_event.clone(),
            tier_prices: config.tier_prices.clone(),
        }
    }
}

impl Default for MetricsPolicy {
    fn default() -> Self {
        Self::from(&MetricsConfig::default())
    }
}

/// Compute the dashboard in one pass over each stream.
///
/// Activity is anchored on the latest event timestamp, not the wall clock, so
/// the same snapshot always yields the same figures.
pub async fn dashboard_metrics<U, E>(
    mut users: U,
    mut events: E,
    policy: &MetricsPolicy,
) -> AnalyticsResult<DashboardMetrics>
where
    U: Stream<Item = AnalyticsResult<User>> + Unpin,
    E: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut total_users = 0u64;
    let mut revenue = 0.0;
    while let Some(user) = users.next().await {
        let user = user?;
        total_users += 1;
        revenue += policy.tier_prices.price(user.subscription_status);
    }

    let mut total_events = 0u64;
    let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut converted: HashSet<String> = HashSet::new();
    let mut latest: Option<DateTime<Utc>> = None;

    while let Some(event) = events.next().await {
        let event = event?;
        total_events += 1;
        latest = Some(latest.map_or(event.timestamp, |l| l.max(event.timestamp)));

        if event.event_name == policy.conversion_event && !converted.contains(&event.user_id) {
            converted.insert(event.user_id.clone());
        }
        let ts = event.timestamp;
        last_seen
            .entry(event.user_id)
            .and_modify(|last| *last = (*last).max(ts))
            .or_insert(ts);
    }

    let active_users = match latest {
        Some(latest) => {
            let cutoff = latest - policy.active_window;
            last_seen.values().filter(|ts| **ts >= cutoff).count() as u64
        }
        None => 0,
    };

    Ok(DashboardMetrics {
        total_users,
        active_users,
        conversion_rate: round2(percentage(converted.len() as u64, total_users)),
        revenue: round2(revenue),
        avg_events_per_user: round2(safe_div(total_events as f64, total_users as f64)),
        total_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vizsprints_core::{SubscriptionTier, Variant};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn users() -> Vec<AnalyticsResult<User>> {
        vec![
            Ok(User::new("u1", at(1), Variant::A)),
            Ok(User::new("u2", at(1), Variant::B).with_tier(SubscriptionTier::Premium)),
            Ok(User::new("u3", at(1), Variant::A).with_tier(SubscriptionTier::Enterprise)),
            Ok(User::new("u4", at(1), Variant::B)),
        ]
    }

    #[tokio::test]
    async fn test_dashboard_metrics() {
        let events: Vec<AnalyticsResult<Event>> = vec![
            Ok(Event::new("u1", "signup_success", at(1))),
            Ok(Event::new("u1", "complete_task", at(2))),
            Ok(Event::new("u2", "signup_success", at(3))),
            Ok(Event::new("u3", "complete_task", at(30))),
            Ok(Event::new("u3", "complete_task", at(31))),
        ];
        let policy = MetricsPolicy {
            active_window: Duration::days(7),
            ..MetricsPolicy::default()
        };

        let m = dashboard_metrics(
            tokio_stream::iter(users()),
            tokio_stream::iter(events),
            &policy,
        )
        .await
        .unwrap();

        assert_eq!(m.total_users, 4);
        assert_eq!(m.total_events, 5);
        assert_eq!(m.active_users, 1);
        assert_eq!(m.conversion_rate, 50.0);
        assert_eq!(m.revenue, 128.0);
        assert_eq!(m.avg_events_per_user, 1.25);
    }

    #[tokio::test]
    async fn test_empty_log_has_zero_rates() {
        let m = dashboard_metrics(
            tokio_stream::iter(Vec::<AnalyticsResult<User>>::new()),
            tokio_stream::iter(Vec::<AnalyticsResult<Event>>::new()),
            &MetricsPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(m.total_users, 0);
        assert_eq!(m.active_users, 0);
        assert_eq!(m.conversion_rate, 0.0);
        assert_eq!(m.avg_events_per_user, 0.0);
    }
}
