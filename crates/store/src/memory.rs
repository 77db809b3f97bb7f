//! In-process snapshot store. Backs tests and embedded callers that already
//! hold the event log in memory.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use vizsprints_core::{Event, User, Variant};

use crate::filter::{EventFilter, EventGate, UserFilter};
use crate::{EventStore, EventStream, UserStream};

/// Immutable users + events snapshot. Cloning is cheap and shares the data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    users: Arc<Vec<User>>,
    events: Arc<Vec<Event>>,
    variants: Arc<HashMap<String, Variant>>,
}

impl InMemoryEventStore {
    pub fn new(users: Vec<User>, events: Vec<Event>) -> Self {
        let variants = users
            .iter()
            .map(|u| (u.user_id.clone(), u.ab_variant))
            .collect();
        Self {
            users: Arc::new(users),
            events: Arc::new(events),
            variants: Arc::new(variants),
        }
    }
}

impl EventStore for InMemoryEventStore {
    fn query(&self, filter: &EventFilter) -> EventStream {
        let sample: Option<HashSet<String>> = filter.user_cap().map(|cap| {
            self.users
                .iter()
                .take(cap)
                .map(|u| u.user_id.clone())
                .collect()
        });
        let mut gate = EventGate::new(filter.clone(), sample);
        let events = Arc::clone(&self.events);
        let variants = Arc::clone(&self.variants);

        let rows = (0..events.len()).filter_map(move |i| {
            let mut event = events[i].clone();
            if event.variant.is_none() {
                event.variant = variants.get(&event.user_id).copied();
            }
            gate.admit(&event).then_some(Ok(event))
        });
        Box::pin(tokio_stream::iter(rows))
    }

    fn users(&self, filter: &UserFilter) -> UserStream {
        let users = Arc::clone(&self.users);
        let filter = filter.clone();
        let take = filter.cap().unwrap_or(usize::MAX);
        let rows = (0..users.len())
            .filter_map(move |i| filter.matches(&users[i]).then(|| Ok(users[i].clone())))
            .take(take);
        Box::pin(tokio_stream::iter(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokio_stream::StreamExt;
    use vizsprints_core::{AnalyticsResult, SubscriptionTier};

    fn fixture() -> InMemoryEventStore {
        let joined = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let mut u1 = User::new("u1", joined, Variant::A);
        u1.country = Some("IN".to_string());
        let mut u3 = User::new("u3", joined, Variant::B);
        u3.country = Some("IN".to_string());
        let users = vec![
            u1,
            User::new("u2", joined, Variant::B).with_tier(SubscriptionTier::Premium),
            u3,
        ];
        let mut events = Vec::new();
        for (i, user) in ["u1", "u2", "u3", "u1", "u2", "u3"].iter().enumerate() {
            let ts = joined + chrono::Duration::hours(i as i64);
            events.push(Event::new(*user, "view_dashboard", ts));
        }
        InMemoryEventStore::new(users, events)
    }

    async fn collect(stream: EventStream) -> Vec<Event> {
        stream
            .collect::<AnalyticsResult<Vec<_>>>()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_resolves_variant_from_users() {
        let store = fixture();
        let events = collect(store.query(&EventFilter::new())).await;
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].variant, Some(Variant::A));
        assert_eq!(events[1].variant, Some(Variant::B));
    }

    #[tokio::test]
    async fn test_variant_filter() {
        let store = fixture();
        let events = collect(store.query(&EventFilter::new().for_variant(Variant::B))).await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.variant == Some(Variant::B)));
    }

    #[tokio::test]
    async fn test_user_sample_takes_first_users() {
        let store = fixture();
        let events = collect(store.query(&EventFilter::new().with_limit(Some(2)))).await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.user_id != "u3"));
    }

    #[tokio::test]
    async fn test_users_stream_respects_limit() {
        let store = fixture();
        let users: Vec<User> = store
            .users(&UserFilter::new().with_limit(Some(2)))
            .collect::<AnalyticsResult<Vec<_>>>()
            .await
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].user_id, "u2");
    }

    #[tokio::test]
    async fn test_users_stream_filters_attributes() {
        let store = fixture();
        let premium: Vec<User> = store
            .users(&UserFilter::new().on_tier(SubscriptionTier::Premium))
            .collect::<AnalyticsResult<Vec<_>>>()
            .await
            .unwrap();
        assert_eq!(premium.len(), 1);
        assert_eq!(premium[0].user_id, "u2");

        let indian: Vec<User> = store
            .users(&UserFilter::new().in_country("IN").with_limit(Some(1)))
            .collect::<AnalyticsResult<Vec<_>>>()
            .await
            .unwrap();
        assert_eq!(indian.len(), 1);
        assert_eq!(indian[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_event_listing_predicates() {
        let store = fixture();
        let events = collect(store.query(&EventFilter::new().for_user("u3"))).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.user_id == "u3"));

        let none = collect(store.query(&EventFilter::new().named("complete_task"))).await;
        assert!(none.is_empty());
    }
}
