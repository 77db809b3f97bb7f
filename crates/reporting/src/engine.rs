//! Query facade: one method per reporting endpoint, all reading the same store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_stream::StreamExt;
use tracing::info;
use vizsprints_core::{AnalyticsResult, AppConfig};
use vizsprints_store::{EventFilter, EventStore, EventStream, UserFilter, UserStream};

use crate::cohort::{compute_cohorts, CohortReport};
use crate::dashboard::{dashboard_metrics, DashboardMetrics, MetricsPolicy};
use crate::experiment::{run_ab_test, AbInput, AbResult};
use crate::funnel::{aggregate_funnel, FunnelDefinition, FunnelReport};
use crate::kpi::{kpi_time_series, KpiPoint, KpiWindow};
use crate::listing::{list_events, list_users, EventListing, UserListing};
use crate::sessions::{user_sessions, SessionPolicy, SessionReport, SessionSort};

/// Stateless between calls: every query re-reads the store snapshot, so
/// concurrent callers never coordinate.
pub struct AnalyticsEngine<S: EventStore> {
    store: Arc<S>,
    config: AppConfig,
    funnel: FunnelDefinition,
}

impl<S: EventStore> AnalyticsEngine<S> {
    /// Build an engine whose funnel follows `config.funnel.stages`.
    pub fn new(store: Arc<S>, config: AppConfig) -> AnalyticsResult<Self> {
        let funnel = FunnelDefinition::from_event_names(&config.funnel.stages)?;
        Ok(Self {
            store,
            config,
            funnel,
        })
    }

    pub fn with_funnel(mut self, funnel: FunnelDefinition) -> Self {
        self.funnel = funnel;
        self
    }

    fn scanned(&self) -> Scanned<'_, S> {
        Scanned::new(self.store.as_ref())
    }

    fn scan(&self, filter: &EventFilter) -> EventStream {
        self.scanned().query(filter)
    }

    fn record(kind: &'static str, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as f64;
        metrics::counter!("reporting.queries", "kind" => kind).increment(1);
        metrics::histogram!("reporting.query_latency_us", "kind" => kind).record(elapsed_us);
    }

    pub async fn funnel(&self) -> AnalyticsResult<FunnelReport> {
        let start = Instant::now();
        let report = aggregate_funnel(self.scan(&EventFilter::new()), &self.funnel).await?;
        Self::record("funnel", start);
        info!(
            stages = report.funnel.len(),
            users = report.total_users,
            events = report.total_events,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Funnel computed"
        );
        Ok(report)
    }

    pub async fn cohorts(&self) -> AnalyticsResult<CohortReport> {
        let start = Instant::now();
        let report = compute_cohorts(
            self.store.users(&UserFilter::new()),
            self.scan(&EventFilter::new()),
            self.config.cohort.max_months,
        )
        .await?;
        Self::record("cohorts", start);
        info!(
            cohorts = report.cohorts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cohort retention computed"
        );
        Ok(report)
    }

    /// Daily DAU and signups; `None` spans the whole log.
    pub async fn kpi_time_series(&self, window: Option<KpiWindow>) -> AnalyticsResult<Vec<KpiPoint>> {
        let start = Instant::now();
        let series = kpi_time_series(self.scan(&EventFilter::new()), window).await?;
        Self::record("kpi", start);
        info!(
            days = series.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "KPI series computed"
        );
        Ok(series)
    }

    pub async fn ab_test(&self, input: &AbInput) -> AnalyticsResult<AbResult> {
        let start = Instant::now();
        let store = self.scanned();
        let result = run_ab_test(&store, &self.funnel, input).await?;
        Self::record("ab_test", start);
        info!(
            events = store.count(),
            confidence_level = result.stats.confidence_level,
            n_a = result.variant_a.total_users,
            n_b = result.variant_b.total_users,
            p_value = result.stats.p_value,
            significant = result.stats.significant,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "A/B test computed"
        );
        Ok(result)
    }

    pub async fn metrics(&self) -> AnalyticsResult<DashboardMetrics> {
        let start = Instant::now();
        let policy = MetricsPolicy::from(&self.config.metrics);
        let metrics = dashboard_metrics(
            self.store.users(&UserFilter::new()),
            self.scan(&EventFilter::new()),
            &policy,
        )
        .await?;
        Self::record("metrics", start);
        info!(
            total_users = metrics.total_users,
            active_users = metrics.active_users,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dashboard metrics computed"
        );
        Ok(metrics)
    }

    /// Ranked session summaries; `limit` defaults to the configured page size.
    pub async fn user_sessions(
        &self,
        sort: SessionSort,
        limit: Option<usize>,
    ) -> AnalyticsResult<SessionReport> {
        let start = Instant::now();
        let policy = SessionPolicy::from(&self.config.sessions);
        let limit = limit.unwrap_or(self.config.sessions.default_limit);
        let report = user_sessions(self.scan(&EventFilter::new()), &policy, sort, limit).await?;
        Self::record("sessions", start);
        info!(
            users = report.total_users,
            returned = report.user_sessions.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "User sessions computed"
        );
        Ok(report)
    }

    /// Registered users matching `filter`.
    pub async fn list_users(&self, filter: &UserFilter) -> AnalyticsResult<UserListing> {
        let start = Instant::now();
        let listing = list_users(self.store.users(filter)).await?;
        Self::record("users", start);
        info!(
            total = listing.total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Users listed"
        );
        Ok(listing)
    }

    /// Events matching `filter`, paged to the configured `listing.max_events`.
    pub async fn list_events(&self, filter: &EventFilter) -> AnalyticsResult<EventListing> {
        let start = Instant::now();
        let listing = list_events(self.scan(filter), self.config.listing.max_events).await?;
        Self::record("events", start);
        info!(
            total = listing.total,
            returned = listing.events.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Events listed"
        );
        Ok(listing)
    }
}

/// Store view that counts every event it hands out, in `reporting.events_scanned`
/// and in a per-request tally.
struct Scanned<'a, S: ?Sized> {
    inner: &'a S,
    count: Arc<AtomicU64>,
}

impl<'a, S: EventStore + ?Sized> Scanned<'a, S> {
    fn new(inner: &'a S) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl<S: EventStore + ?Sized> EventStore for Scanned<'_, S> {
    fn query(&self, filter: &EventFilter) -> EventStream {
        let count = Arc::clone(&self.count);
        Box::pin(self.inner.query(filter).map(move |event| {
            if event.is_ok() {
                count.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("reporting.events_scanned").increment(1);
            }
            event
        }))
    }

    fn users(&self, filter: &UserFilter) -> UserStream {
        self.inner.users(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vizsprints_core::{Event, User, Variant};
    use vizsprints_store::InMemoryEventStore;

    fn store() -> InMemoryEventStore {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let users = vec![
            User::new("a1", at, Variant::A),
            User::new("b1", at, Variant::B),
        ];
        let events = vec![
            Event::new("a1", "signup_success", at),
            Event::new("a1", "view_dashboard", at),
            Event::new("b1", "signup_success", at),
        ];
        InMemoryEventStore::new(users, events)
    }

    #[tokio::test]
    async fn test_live_ab_reads_are_counted() {
        let store = store();
        let scanned = Scanned::new(&store);
        let funnel = FunnelDefinition::from_event_names(&["signup_success"]).unwrap();
        let input = AbInput::Live {
            sample_limit: None,
            event_limit: None,
            confidence_level: 0.95,
        };

        run_ab_test(&scanned, &funnel, &input).await.unwrap();
        assert_eq!(scanned.count(), 3);
    }

    #[tokio::test]
    async fn test_scan_counts_only_admitted_events() {
        let store = store();
        let scanned = Scanned::new(&store);
        let events: Vec<_> = scanned
            .query(&EventFilter::new().for_user("a1"))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(scanned.count(), 2);
    }
}
