//! Product analytics reporting — funnels, cohort retention, daily KPIs,
//! A/B significance testing, dashboard metrics, user sessions, and raw listings.

pub mod cohort;
pub mod dashboard;
pub mod engine;
pub mod experiment;
pub mod funnel;
pub mod kpi;
pub mod listing;
pub mod math;
pub mod normal;
pub mod sessions;

pub use cohort::{CohortReport, CohortRow};
pub use dashboard::{DashboardMetrics, MetricsPolicy};
pub use engine::AnalyticsEngine;
pub use experiment::{AbInput, AbResult, AbStats, ConfidenceLevel, VariantSummary};
pub use funnel::{FunnelDefinition, FunnelReport, FunnelStageDef, StageResult};
pub use kpi::{KpiPoint, KpiWindow};
pub use listing::{EventListing, UserListing};
pub use sessions::{ActivityStatus, SessionReport, SessionSort, UserSessionSummary};
