//! Funnel analysis — tracks user progression through ordered conversion stages.
//!
//! Membership is chained: a user counts at stage `i` only if they were counted
//! at stage `i - 1`. Event order and timestamps play no part.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use vizsprints_core::{AnalyticsError, AnalyticsResult, Event};

use crate::math::{percentage, round2};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStageDef {
    pub name: String,
    pub matching_event_names: BTreeSet<String>,
    pub order: u32,
}

impl FunnelStageDef {
    pub fn new<I, E>(name: impl Into<String>, order: u32, matching: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        Self {
            name: name.into(),
            matching_event_names: matching.into_iter().map(Into::into).collect(),
            order,
        }
    }

    /// A stage matching exactly one event, displayed as its title-cased name.
    pub fn for_event(event_name: &str, order: u32) -> Self {
        Self::new(title_case(event_name), order, [event_name])
    }
}

/// Validated, ordered stage sequence with an event-name lookup index.
#[derive(Debug, Clone)]
pub struct FunnelDefinition {
    stages: Vec<FunnelStageDef>,
    index: HashMap<String, Vec<usize>>,
}

impl FunnelDefinition {
    pub fn new(stages: Vec<FunnelStageDef>) -> AnalyticsResult<Self> {
        if stages.is_empty() {
            return Err(AnalyticsError::invalid("funnel needs at least one stage"));
        }

        let mut names = HashSet::new();
        for (i, stage) in stages.iter().enumerate() {
            if !names.insert(stage.name.as_str()) {
                return Err(AnalyticsError::invalid(format!(
                    "duplicate funnel stage name '{}'",
                    stage.name
                )));
            }
            if stage.matching_event_names.is_empty() {
                return Err(AnalyticsError::invalid(format!(
                    "funnel stage '{}' matches no events",
                    stage.name
                )));
            }
            if i > 0 && stage.order <= stages[i - 1].order {
                return Err(AnalyticsError::invalid(format!(
                    "funnel stage '{}' has order {} not greater than {}",
                    stage.name,
                    stage.order,
                    stages[i - 1].order
                )));
            }
        }

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            for event_name in &stage.matching_event_names {
                index.entry(event_name.clone()).or_default().push(i);
            }
        }

        Ok(Self { stages, index })
    }

    /// One stage per event name, in the given order.
    pub fn from_event_names<S: AsRef<str>>(event_names: &[S]) -> AnalyticsResult<Self> {
        let stages = event_names
            .iter()
            .enumerate()
            .map(|(i, name)| FunnelStageDef::for_event(name.as_ref(), i as u32))
            .collect();
        Self::new(stages)
    }

    pub fn stages(&self) -> &[FunnelStageDef] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn stages_matching(&self, event_name: &str) -> &[usize] {
        self.index.get(event_name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub users: u64,
    pub conversion_rate: f64,
    pub conversion_from_previous: f64,
    pub drop_off: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub funnel: Vec<StageResult>,
    /// Distinct users seen in the scanned events.
    pub total_users: u64,
    pub total_events: u64,
}

impl FunnelReport {
    pub fn entrants(&self) -> u64 {
        self.funnel.first().map_or(0, |s| s.users)
    }

    pub fn completions(&self) -> u64 {
        self.funnel.last().map_or(0, |s| s.users)
    }
}

/// Turn chained per-stage user counts into rate rows.
pub fn stage_results<S: AsRef<str>>(names: &[S], counts: &[u64]) -> Vec<StageResult> {
    let entrants = counts.first().copied().unwrap_or(0);

    names
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (name, &users))| {
            let (conversion_rate, conversion_from_previous, drop_off) = if entrants == 0 {
                (0.0, 0.0, 0.0)
            } else {
                let from_previous = if i == 0 {
                    100.0
                } else {
                    round2(percentage(users, counts[i - 1]))
                };
                (
                    round2(percentage(users, entrants)),
                    from_previous,
                    round2(100.0 - from_previous),
                )
            };
            StageResult {
                stage: name.as_ref().to_string(),
                users,
                conversion_rate,
                conversion_from_previous,
                drop_off,
            }
        })
        .collect()
}

/// Single-pass accumulator. Feed it every event, then call [`finish`](Self::finish).
pub struct FunnelAccumulator<'a> {
    definition: &'a FunnelDefinition,
    matched: Vec<HashSet<String>>,
    users: HashSet<String>,
    events: u64,
}

impl<'a> FunnelAccumulator<'a> {
    pub fn new(definition: &'a FunnelDefinition) -> Self {
        Self {
            definition,
            matched: vec![HashSet::new(); definition.len()],
            users: HashSet::new(),
            events: 0,
        }
    }

    pub fn observe(&mut self, event: &Event) {
        self.events += 1;
        if !self.users.contains(&event.user_id) {
            self.users.insert(event.user_id.clone());
        }
        for &stage in self.definition.stages_matching(&event.event_name) {
            let set = &mut self.matched[stage];
            if !set.contains(&event.user_id) {
                set.insert(event.user_id.clone());
            }
        }
    }

    pub fn finish(self) -> FunnelReport {
        let mut counts = Vec::with_capacity(self.matched.len());
        let mut chained: HashSet<&str> = self.matched[0].iter().map(String::as_str).collect();
        counts.push(chained.len() as u64);
        for stage in &self.matched[1..] {
            chained.retain(|user| stage.contains(*user));
            counts.push(chained.len() as u64);
        }

        let names: Vec<&str> = self
            .definition
            .stages()
            .iter()
            .map(|s| s.name.as_str())
            .collect();

        FunnelReport {
            funnel: stage_results(&names, &counts),
            total_users: self.users.len() as u64,
            total_events: self.events,
        }
    }
}

/// Drain an event stream through the funnel.
pub async fn aggregate_funnel<S>(
    mut events: S,
    definition: &FunnelDefinition,
) -> AnalyticsResult<FunnelReport>
where
    S: Stream<Item = AnalyticsResult<Event>> + Unpin,
{
    let mut acc = FunnelAccumulator::new(definition);
    while let Some(event) = events.next().await {
        acc.observe(&event?);
    }
    Ok(acc.finish())
}

fn title_case(raw: &str) -> String {
    raw.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
