//! Daily KPI rollups: active users and signups, zero-filled across the window.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::{AnalyticsError, AnalyticsResult, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiPoint {
    pub date: NaiveDate,
    /// Distinct users with at least one event that day.
    pub dau: u64,
    /// Distinct users whose first-ever event falls on that day.
    pub signups: u64,
}

/// Inclusive UTC calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl KpiWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AnalyticsResult<Self> {
        if start > end {
            return Err(AnalyticsError::invalid(format!(
                "KPI window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

/// One pass over the full log. Signups need every user's first event, so the
/// stream must not be pre-filtered to the window.
///
/// Without an explicit window the series spans the first to the last event
/// date; an empty log then yields an empty series.
pub async fn kpi_time_series<S>(
    mut events: S,
    window: Option<KpiWindow>,
) -> AnalyticsResult<Vec<KpiPoint>>
where
    S: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut active: BTreeMap<NaiveDate, HashSet<String>> = BTreeMap::new();
    let mut first_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut bounds: Option<(NaiveDate, NaiveDate)> = None;

    while let Some(event) = events.next().await {
        let event = event?;
        let day = event.timestamp.date_naive();

        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(day), hi.max(day)),
            None => (day, day),
        });

        if window.map_or(true, |w| w.contains(day)) {
            let users = active.entry(day).or_default();
            if !users.contains(&event.user_id) {
                users.insert(event.user_id.clone());
            }
        }

        let ts = event.timestamp;
        first_seen
            .entry(event.user_id)
            .and_modify(|first| {
                if ts < *first {
                    *first = ts;
                }
            })
            .or_insert(ts);
    }

    let window = match (window, bounds) {
        (Some(w), _) => w,
        (None, Some((start, end))) => KpiWindow { start, end },
        (None, None) => return Ok(Vec::new()),
    };

    let mut signups: HashMap<NaiveDate, u64> = HashMap::new();
    for first in first_seen.values() {
        let day = first.date_naive();
        if window.contains(day) {
            *signups.entry(day).or_insert(0) += 1;
        }
    }

    Ok(window
        .days()
        .map(|date| KpiPoint {
            date,
            dau: active.get(&date).map_or(0, |u| u.len() as u64),
            signups: signups.get(&date).copied().unwrap_or(0),
        })
        .collect())
}
