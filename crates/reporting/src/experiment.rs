//! Two-variant hypothesis testing.
//!
//! Live runs derive counts from the funnel per variant; simulations take them
//! as inputs. Both feed the same pooled two-proportion z-test.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vizsprints_core::{AnalyticsError, AnalyticsResult, Variant};
use vizsprints_store::{EventFilter, EventStore};

use crate::funnel::{aggregate_funnel, stage_results, FunnelDefinition, FunnelReport, StageResult};
use crate::math::{round2, safe_div};
use crate::normal;

/// Supported two-sided confidence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    P90,
    P95,
    P99,
}

impl ConfidenceLevel {
    pub fn value(self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 0.90,
            ConfidenceLevel::P95 => 0.95,
            ConfidenceLevel::P99 => 0.99,
        }
    }

    pub fn alpha(self) -> f64 {
        1.0 - self.value()
    }
}

impl TryFrom<f64> for ConfidenceLevel {
    type Error = AnalyticsError;

    fn try_from(level: f64) -> Result<Self, Self::Error> {
        [ConfidenceLevel::P90, ConfidenceLevel::P95, ConfidenceLevel::P99]
            .into_iter()
            .find(|c| (c.value() - level).abs() < 1e-9)
            .ok_or_else(|| {
                AnalyticsError::invalid(format!(
                    "confidence_level must be one of 0.90, 0.95, 0.99 (got {level})"
                ))
            })
    }
}

/// Request for an A/B comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AbInput {
    /// Aggregate the funnel per variant from the event store.
    Live {
        sample_limit: Option<usize>,
        event_limit: Option<usize>,
        confidence_level: f64,
    },
    /// Counts and conversion percentages supplied directly.
    Simulation {
        n_a: i64,
        n_b: i64,
        conv_rate_a_pct: f64,
        conv_rate_b_pct: f64,
        confidence_level: f64,
    },
}

impl AbInput {
    pub fn confidence_level(&self) -> f64 {
        match self {
            AbInput::Live {
                confidence_level, ..
            }
            | AbInput::Simulation {
                confidence_level, ..
            } => *confidence_level,
        }
    }
}

/// Entrants and converters of one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounts {
    pub n: u64,
    pub conversions: u64,
}

impl VariantCounts {
    pub fn new(n: u64, conversions: u64) -> Self {
        Self { n, conversions }
    }

    /// Conversion proportion, `0` for an empty arm.
    pub fn rate(&self) -> f64 {
        safe_div(self.conversions as f64, self.n as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub total_users: u64,
    pub conversions: u64,
    /// Live runs only.
    pub total_events: Option<u64>,
    /// Live runs only.
    pub avg_events_per_user: Option<f64>,
    pub funnel: Vec<StageResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbStats {
    pub p_value: f64,
    pub z_score: f64,
    pub significant: bool,
    pub power: f64,
    pub confidence_level: f64,
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbResult {
    #[serde(rename = "variant_A")]
    pub variant_a: VariantSummary,
    #[serde(rename = "variant_B")]
    pub variant_b: VariantSummary,
    pub stats: AbStats,
    /// Relative difference of B over A in percent; positive means B converts better.
    pub lift: f64,
}

/// Outcome of the pooled two-proportion z-test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionTest {
    pub stats: AbStats,
    pub lift: f64,
}

/// Pooled two-proportion z-test with post-hoc power.
///
/// Any zero-sample or zero-variance input produces the neutral result
/// (`p_value = 1`, not significant, `power = 0`, `lift = 0`).
pub fn two_proportion_test(
    a: VariantCounts,
    b: VariantCounts,
    level: ConfidenceLevel,
) -> ProportionTest {
    let alpha = level.alpha();
    let neutral = ProportionTest {
        stats: AbStats {
            p_value: 1.0,
            z_score: 0.0,
            significant: false,
            power: 0.0,
            confidence_level: level.value(),
            alpha,
        },
        lift: 0.0,
    };

    if a.n == 0 || b.n == 0 {
        return neutral;
    }

    let (n_a, n_b) = (a.n as f64, b.n as f64);
    let (p_a, p_b) = (a.rate(), b.rate());
    let p_pool = safe_div((a.conversions + b.conversions) as f64, n_a + n_b);
    let se_null = (p_pool * (1.0 - p_pool) * (1.0 / n_a + 1.0 / n_b)).sqrt();
    if se_null == 0.0 || !se_null.is_finite() {
        return neutral;
    }

    let diff = p_b - p_a;
    let z_score = diff / se_null;
    let p_value = (2.0 * normal::upper_tail(z_score.abs())).clamp(0.0, 1.0);
    let significant = p_value < alpha;

    let lift = if p_a > 0.0 {
        round2(diff / p_a * 100.0)
    } else {
        0.0
    };

    let se_alt = (p_a * (1.0 - p_a) / n_a + p_b * (1.0 - p_b) / n_b).sqrt();
    let power = if se_alt == 0.0 {
        0.0
    } else {
        let z_crit = normal::quantile(1.0 - alpha / 2.0);
        normal::cdf((diff.abs() - z_crit * se_null) / se_alt).clamp(0.0, 1.0)
    };

    ProportionTest {
        stats: AbStats {
            p_value,
            z_score,
            significant,
            power,
            confidence_level: level.value(),
            alpha,
        },
        lift,
    }
}

struct Arm {
    counts: VariantCounts,
    summary: VariantSummary,
}

impl Arm {
    fn from_funnel(report: FunnelReport) -> Self {
        let counts = VariantCounts::new(report.entrants(), report.completions());
        Self {
            counts,
            summary: VariantSummary {
                total_users: counts.n,
                conversions: counts.conversions,
                total_events: Some(report.total_events),
                avg_events_per_user: Some(round2(safe_div(
                    report.total_events as f64,
                    counts.n as f64,
                ))),
                funnel: report.funnel,
            },
        }
    }

    fn simulated(label: &str, n: i64, conv_pct: f64) -> AnalyticsResult<Self> {
        let n = u64::try_from(n).map_err(|_| {
            AnalyticsError::invalid(format!("sample size for variant {label} must be non-negative (got {n})"))
        })?;
        if !conv_pct.is_finite() || !(0.0..=100.0).contains(&conv_pct) {
            return Err(AnalyticsError::invalid(format!(
                "conversion rate for variant {label} must be within 0..=100 percent (got {conv_pct})"
            )));
        }
        let conversions = (n as f64 * conv_pct / 100.0).round() as u64;
        let counts = VariantCounts::new(n, conversions.min(n));
        Ok(Self {
            counts,
            summary: VariantSummary {
                total_users: counts.n,
                conversions: counts.conversions,
                total_events: None,
                avg_events_per_user: None,
                funnel: stage_results(&["Entrants", "Converters"], &[counts.n, counts.conversions]),
            },
        })
    }
}

async fn live_arm<S>(
    store: &S,
    funnel: &FunnelDefinition,
    filter: EventFilter,
) -> AnalyticsResult<Arm>
where
    S: EventStore + ?Sized,
{
    let report = aggregate_funnel(store.query(&filter), funnel).await?;
    Ok(Arm::from_funnel(report))
}

/// Run an A/B comparison. Parameters are validated before any event is read.
pub async fn run_ab_test<S>(
    store: &S,
    funnel: &FunnelDefinition,
    input: &AbInput,
) -> AnalyticsResult<AbResult>
where
    S: EventStore + ?Sized,
{
    let level = ConfidenceLevel::try_from(input.confidence_level())?;

    let (arm_a, arm_b) = match input {
        AbInput::Live {
            sample_limit,
            event_limit,
            ..
        } => {
            let base = EventFilter::new()
                .with_limit(*sample_limit)
                .with_event_limit(*event_limit);
            let (a, b) = tokio::join!(
                live_arm(store, funnel, base.clone().for_variant(Variant::A)),
                live_arm(store, funnel, base.for_variant(Variant::B)),
            );
            (a?, b?)
        }
        AbInput::Simulation {
            n_a,
            n_b,
            conv_rate_a_pct,
            conv_rate_b_pct,
            ..
        } => (
            Arm::simulated("A", *n_a, *conv_rate_a_pct)?,
            Arm::simulated("B", *n_b, *conv_rate_b_pct)?,
        ),
    };

    let test = two_proportion_test(arm_a.counts, arm_b.counts, level);
    debug!(
        n_a = arm_a.counts.n,
        n_b = arm_b.counts.n,
        conv_a = arm_a.counts.conversions,
        conv_b = arm_b.counts.conversions,
        p_value = test.stats.p_value,
        "A/B test computed"
    );

    Ok(AbResult {
        variant_a: arm_a.summary,
        variant_b: arm_b.summary,
        stats: test.stats,
        lift: test.lift,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(n: u64, c: u64) -> VariantCounts {
        VariantCounts::new(n, c)
    }

    #[test]
    fn test_confidence_level_parsing() {
        assert_eq!(ConfidenceLevel::try_from(0.95).unwrap(), ConfidenceLevel::P95);
        assert_eq!(ConfidenceLevel::try_from(0.9).unwrap(), ConfidenceLevel::P90);
        assert_eq!(ConfidenceLevel::try_from(0.99).unwrap(), ConfidenceLevel::P99);
        assert!(ConfidenceLevel::try_from(0.8)
            .unwrap_err()
            .is_invalid_parameter());
    }

    #[test]
    fn test_modest_lift_is_not_significant() {
        let test = two_proportion_test(counts(1000, 100), counts(1000, 120), ConfidenceLevel::P95);
        assert_eq!(test.lift, 20.0);
        assert!(!test.stats.significant);
        // Pooled SE = sqrt(0.11 * 0.89 * 0.002), z ≈ 1.43.
        assert!((test.stats.z_score - 1.4293).abs() < 1e-3);
        assert!(test.stats.p_value > 0.14 && test.stats.p_value < 0.17);
        assert!((test.stats.power - 0.2977).abs() < 1e-3, "power {}", test.stats.power);
    }

    #[test]
    fn test_large_sample_is_significant() {
        let test = two_proportion_test(
            counts(10_000, 1_000),
            counts(10_000, 1_300),
            ConfidenceLevel::P95,
        );
        assert_eq!(test.lift, 30.0);
        assert!(test.stats.significant);
        assert!(test.stats.p_value < 1e-6);
        assert!(test.stats.power > 0.99);
    }

    #[test]
    fn test_empty_control_is_neutral() {
        let test = two_proportion_test(counts(0, 0), counts(500, 50), ConfidenceLevel::P95);
        assert_eq!(test.stats.p_value, 1.0);
        assert!(!test.stats.significant);
        assert_eq!(test.stats.power, 0.0);
        assert_eq!(test.lift, 0.0);
    }

    #[test]
    fn test_boundary_grid_stays_in_unit_interval() {
        let sizes = [0u64, 1, 7, 250];
        for &n_a in &sizes {
            for &n_b in &sizes {
                for conv_a in [0, n_a / 2, n_a] {
                    for conv_b in [0, n_b / 2, n_b] {
                        for level in [ConfidenceLevel::P90, ConfidenceLevel::P95, ConfidenceLevel::P99] {
                            let t = two_proportion_test(counts(n_a, conv_a), counts(n_b, conv_b), level);
                            assert!((0.0..=1.0).contains(&t.stats.p_value), "p {:?}", t);
                            assert!((0.0..=1.0).contains(&t.stats.power), "power {:?}", t);
                            assert!(t.lift.is_finite());
                            assert!(t.stats.z_score.is_finite());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_identical_arms_have_p_value_one() {
        let t = two_proportion_test(counts(800, 80), counts(800, 80), ConfidenceLevel::P95);
        assert!((t.stats.p_value - 1.0).abs() < 1e-6);
        assert_eq!(t.lift, 0.0);
    }

    #[test]
    fn test_all_converted_both_arms_is_neutral() {
        let t = two_proportion_test(counts(40, 40), counts(60, 60), ConfidenceLevel::P99);
        assert_eq!(t.stats.p_value, 1.0);
        assert_eq!(t.stats.power, 0.0);
    }

    #[test]
    fn test_simulated_arm_rounds_conversions() {
        let arm = Arm::simulated("A", 333, 10.0).unwrap();
        assert_eq!(arm.counts, counts(333, 33));
        assert_eq!(arm.summary.funnel.len(), 2);
        assert_eq!(arm.summary.funnel[1].users, 33);
        assert!(arm.summary.avg_events_per_user.is_none());
    }

    #[test]
    fn test_simulated_arm_rejects_bad_inputs() {
        assert!(Arm::simulated("A", -5, 10.0).is_err());
        assert!(Arm::simulated("B", 10, 120.0).is_err());
        assert!(Arm::simulated("B", 10, f64::NAN).is_err());
    }

    #[test]
    fn test_result_serializes_variant_keys() {
        let summary = VariantSummary {
            total_users: 0,
            conversions: 0,
            total_events: None,
            avg_events_per_user: None,
            funnel: vec![],
        };
        let test = two_proportion_test(counts(0, 0), counts(0, 0), ConfidenceLevel::P95);
        let result = AbResult {
            variant_a: summary.clone(),
            variant_b: summary,
            stats: test.stats,
            lift: test.lift,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("variant_A").is_some());
        assert!(json.get("variant_B").is_some());
        assert_eq!(json["stats"]["p_value"], 1.0);
    }
}
