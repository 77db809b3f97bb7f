//! Raw record listings: filtered users and events with their match counts.

use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::{AnalyticsResult, Event, User};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserListing {
    pub users: Vec<User>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventListing {
    /// The first `max_events` matches in store order.
    pub events: Vec<Event>,
    /// Every match, including those beyond the page.
    pub total: u64,
}

pub async fn list_users<S>(mut users: S) -> AnalyticsResult<UserListing>
where
    S: Stream<Item = AnalyticsResult<User>> + Unpin,
{
    let mut listed = Vec::new();
    while let Some(user) = users.next().await {
        listed.push(user?);
    }
    Ok(UserListing {
        total: listed.len() as u64,
        users: listed,
    })
}

pub async fn list_events<S>(mut events: S, max_events: usize) -> AnalyticsResult<EventListing>
where
    S: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut page = Vec::with_capacity(max_events.min(1024));
    let mut total = 0u64;
    while let Some(event) = events.next().await {
        let event = event?;
        total += 1;
        if page.len() < max_events {
            page.push(event);
        }
    }
    Ok(EventListing {
        events: page,
        total,
    })
}
