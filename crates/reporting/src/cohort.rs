//! Cohort analysis — monthly signup cohorts and their month-offset retention.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::{AnalyticsResult, Event, User};

use crate::math::{percentage, round_to};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRow {
    /// Signup month as `YYYY-MM`.
    pub cohort_month: String,
    pub size: u64,
    /// Percentage of the cohort active `offset` months after signup. Offsets not
    /// yet observable in the log are absent rather than zero.
    pub retention: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortReport {
    pub cohorts: Vec<CohortRow>,
    /// Largest offset computed across all cohorts.
    pub max_months: u32,
}

/// Months since year 0, so consecutive calendar months differ by one.
fn month_index(ts: &DateTime<Utc>) -> i64 {
    ts.year() as i64 * 12 + ts.month0() as i64
}

fn month_label(index: i64) -> String {
    format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
}

#[derive(Default)]
struct CohortActivity {
    members: HashSet<String>,
    active_by_offset: HashMap<u32, HashSet<String>>,
}

/// Bucket users by signup month and measure retention from their events.
///
/// Cohort size counts members with at least one recorded event. Elapsed time is
/// measured against the latest event in the log, so the result depends only on
/// the snapshot.
pub async fn compute_cohorts<U, E>(
    mut users: U,
    mut events: E,
    max_months: u32,
) -> AnalyticsResult<CohortReport>
where
    U: Stream<Item = AnalyticsResult<User>> + Unpin,
    E: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut signup_month: HashMap<String, i64> = HashMap::new();
    while let Some(user) = users.next().await {
        let user = user?;
        signup_month.insert(user.user_id, month_index(&user.joined_at));
    }

    let mut cohorts: BTreeMap<i64, CohortActivity> = BTreeMap::new();
    let mut latest_month: Option<i64> = None;

    while let Some(event) = events.next().await {
        let event = event?;
        let Some(&cohort) = signup_month.get(&event.user_id) else {
            continue;
        };
        let event_month = month_index(&event.timestamp);
        latest_month = Some(latest_month.map_or(event_month, |m| m.max(event_month)));

        let activity = cohorts.entry(cohort).or_default();
        if !activity.members.contains(&event.user_id) {
            activity.members.insert(event.user_id.clone());
        }
        if let Ok(offset) = u32::try_from(event_month - cohort) {
            activity
                .active_by_offset
                .entry(offset)
                .or_default()
                .insert(event.user_id);
        }
    }

    let Some(latest_month) = latest_month else {
        return Ok(CohortReport {
            cohorts: Vec::new(),
            max_months: 0,
        });
    };

    let mut rows = Vec::with_capacity(cohorts.len());
    let mut widest = 0u32;
    for (cohort, activity) in cohorts {
        let size = activity.members.len() as u64;
        let elapsed = u32::try_from(latest_month - cohort).unwrap_or(0);
        let last_offset = elapsed.min(max_months);
        widest = widest.max(last_offset);

        let mut retention = BTreeMap::new();
        for offset in 0..=last_offset {
            let active = if offset == 0 {
                size
            } else {
                activity
                    .active_by_offset
                    .get(&offset)
                    .map_or(0, |users| users.len() as u64)
            };
            retention.insert(offset, round_to(percentage(active, size), 0));
        }

        rows.push(CohortRow {
            cohort_month: month_label(cohort),
            size,
            retention,
        });
    }

    Ok(CohortReport {
        cohorts: rows,
        max_months: widest,
    })
}
