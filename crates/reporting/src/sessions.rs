//! Per-user session reconstruction from the raw event log.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::config::SessionConfig;
use vizsprints_core::{AnalyticsError, AnalyticsResult, Event};

use crate::math::{round2, safe_div};

/// Ranking key for the session report. Always descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSort {
    #[default]
    TotalHours,
    TotalSessions,
    LastActivity,
}

impl FromStr for SessionSort {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total_hours" => Ok(SessionSort::TotalHours),
            "total_sessions" => Ok(SessionSort::TotalSessions),
            "last_activity" => Ok(SessionSort::LastActivity),
            other => Err(AnalyticsError::invalid(format!(
                "sort_by must be one of total_hours, total_sessions, last_activity (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// A gap longer than this starts a new session.
    pub timeout: Duration,
    pub single_event: Duration,
    pub active_window: Duration,
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout: Duration::minutes(config.timeout_minutes),
            single_event: Duration::minutes(config.single_event_minutes),
            active_window: Duration::days(config.active_window_days),
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSessionSummary {
    pub user_id: String,
    pub total_sessions: u64,
    pub total_hours: f64,
    /// Mean session length in hours.
    pub avg_session_duration: f64,
    pub first_activity: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub user_sessions: Vec<UserSessionSummary>,
    /// Users with any activity, before truncation to the limit.
    pub total_users: u64,
}

struct Tally {
    user_id: String,
    sessions: u64,
    hours: f64,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

fn hours(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 3_600_000.0
}

fn tally(user_id: String, mut stamps: Vec<DateTime<Utc>>, policy: &SessionPolicy) -> Option<Tally> {
    stamps.sort_unstable();
    let (&first, &last) = (stamps.first()?, stamps.last()?);

    let mut sessions = 0u64;
    let mut total = 0.0;
    let mut start = first;
    let mut prev = first;
    let mut events_in_session = 0usize;

    let mut close = |start: DateTime<Utc>, end: DateTime<Utc>, events: usize| {
        sessions += 1;
        total += if events == 1 {
            hours(policy.single_event)
        } else {
            hours(end - start)
        };
    };

    for &ts in &stamps {
        if events_in_session > 0 && ts - prev > policy.timeout {
            close(start, prev, events_in_session);
            start = ts;
            events_in_session = 0;
        }
        events_in_session += 1;
        prev = ts;
    }
    close(start, prev, events_in_session);

    Some(Tally {
        user_id,
        sessions,
        hours: total,
        first,
        last,
    })
}

fn rank(a: &Tally, b: &Tally, sort: SessionSort) -> Ordering {
    let primary = match sort {
        SessionSort::TotalHours => b.hours.total_cmp(&a.hours),
        SessionSort::TotalSessions => b.sessions.cmp(&a.sessions),
        SessionSort::LastActivity => b.last.cmp(&a.last),
    };
    primary.then_with(|| a.user_id.cmp(&b.user_id))
}

/// Split each user's events into sessions and rank users by `sort`.
pub async fn user_sessions<S>(
    mut events: S,
    policy: &SessionPolicy,
    sort: SessionSort,
    limit: usize,
) -> AnalyticsResult<SessionReport>
where
    S: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut by_user: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
    let mut latest: Option<DateTime<Utc>> = None;
    while let Some(event) = events.next().await {
        let event = event?;
        latest = Some(latest.map_or(event.timestamp, |l| l.max(event.timestamp)));
        by_user.entry(event.user_id).or_default().push(event.timestamp);
    }

    let mut tallies: Vec<Tally> = by_user
        .into_iter()
        .filter_map(|(user, stamps)| tally(user, stamps, policy))
        .collect();
    tallies.sort_by(|a, b| rank(a, b, sort));

    let total_users = tallies.len() as u64;
    let cutoff = latest.map(|l| l - policy.active_window);

    let user_sessions = tallies
        .into_iter()
        .take(limit)
        .map(|t| UserSessionSummary {
            status: if cutoff.map_or(false, |c| t.last >= c) {
                ActivityStatus::Active
            } else {
                ActivityStatus::Inactive
            },
            avg_session_duration: round2(safe_div(t.hours, t.sessions as f64)),
            total_hours: round2(t.hours),
            total_sessions: t.sessions,
            first_activity: t.first,
            last_activity: t.last,
            user_id: t.user_id,
        })
        .collect();

    Ok(SessionReport {
        user_sessions,
        total_users,
    })
}
