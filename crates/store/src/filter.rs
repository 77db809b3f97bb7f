use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use vizsprints_core::{Event, SubscriptionTier, User, Variant};

/// Constraints pushed down to an [`EventStore`](crate::EventStore) query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Only events of the first `limit` users (store order). `0` means no cap.
    pub limit: Option<usize>,
    /// At most this many events per user (store order). `0` means no cap.
    pub event_limit: Option<usize>,
    pub variant: Option<Variant>,
    pub user_id: Option<String>,
    pub event_name: Option<String>,
    /// Inclusive lower bound on the event timestamp.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub end: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_event_limit(mut self, event_limit: Option<usize>) -> Self {
        self.event_limit = event_limit;
        self
    }

    pub fn for_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn named(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    pub fn between(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.within(Some(start), Some(end))
    }

    /// Either bound may be open.
    pub fn within(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn user_cap(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }

    pub fn per_user_cap(&self) -> Option<usize> {
        self.event_limit.filter(|&n| n > 0)
    }

    pub fn in_time_range(&self, ts: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *ts >= s) && self.end.map_or(true, |e| *ts <= e)
    }
}

/// Attribute predicates for listing registered users. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    /// At most this many matching users (store order). `0` means no cap.
    pub limit: Option<usize>,
    pub country: Option<String>,
    pub device: Option<String>,
    pub subscription_status: Option<SubscriptionTier>,
}

impl UserFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn in_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn on_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn on_tier(mut self, tier: SubscriptionTier) -> Self {
        self.subscription_status = Some(tier);
        self
    }

    pub fn cap(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }

    pub fn matches(&self, user: &User) -> bool {
        fn attr(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().map_or(true, |w| have.as_ref() == Some(w))
        }
        attr(&self.country, &user.country)
            && attr(&self.device, &user.device)
            && self
                .subscription_status
                .map_or(true, |tier| tier == user.subscription_status)
    }
}

/// Stateful admission check applying an [`EventFilter`] to a row sequence.
pub(crate) struct EventGate {
    filter: EventFilter,
    sample: Option<HashSet<String>>,
    per_user: HashMap<String, usize>,
}

impl EventGate {
    pub(crate) fn new(filter: EventFilter, sample: Option<HashSet<String>>) -> Self {
        Self {
            filter,
            sample,
            per_user: HashMap::new(),
        }
    }

    /// `event.variant` must already be resolved.
    pub(crate) fn admit(&mut self, event: &Event) -> bool {
        if let Some(sample) = &self.sample {
            if !sample.contains(&event.user_id) {
                return false;
            }
        }
        if let Some(variant) = self.filter.variant {
            if event.variant != Some(variant) {
                return false;
            }
        }
        if !self.filter.in_time_range(&event.timestamp) {
            return false;
        }
        if self.filter.user_id.as_ref().is_some_and(|id| *id != event.user_id) {
            return false;
        }
        if self.filter.event_name.as_ref().is_some_and(|name| *name != event.event_name) {
            return false;
        }
        if let Some(cap) = self.filter.per_user_cap() {
            let seen = self.per_user.entry(event.user_id.clone()).or_insert(0);
            if *seen >= cap {
                return false;
            }
            *seen += 1;
        }
        true
    }
}
