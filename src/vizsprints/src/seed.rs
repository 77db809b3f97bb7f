//! Synthetic dataset generator for local development databases.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use vizsprints_core::{Event, SubscriptionTier, User, Variant};

const DEVICES: [&str; 3] = ["Mobile", "Desktop", "Tablet"];
const DEVICE_WEIGHTS: [u32; 3] = [60, 30, 10];

const COUNTRIES: [&str; 10] = ["US", "IN", "UK", "CA", "AU", "DE", "FR", "JP", "BR", "SG"];
const COUNTRY_WEIGHTS: [u32; 10] = [30, 20, 10, 8, 7, 6, 5, 5, 5, 4];

const TIERS: [SubscriptionTier; 3] = [
    SubscriptionTier::Free,
    SubscriptionTier::Premium,
    SubscriptionTier::Enterprise,
];
const TIER_WEIGHTS: [u32; 3] = [70, 25, 5];

const FUNNEL: [&str; 5] = [
    "signup_success",
    "view_dashboard",
    "start_project",
    "complete_task",
    "invite_user",
];

/// Probability of reaching each stage after the first.
const STAGE_PROBABILITIES: [f64; 4] = [0.8, 0.6, 0.4, 0.2];
const VARIANT_B_BOOST: f64 = 1.15;

const ENGAGEMENT: [&str; 9] = [
    "view_dashboard",
    "start_project",
    "complete_task",
    "invite_user",
    "upgrade_subscription",
    "export_data",
    "share_report",
    "create_chart",
    "delete_project",
];

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub users: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            users: 1000,
            start: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }
}

pub struct Dataset {
    pub users: Vec<User>,
    /// Sorted by timestamp.
    pub events: Vec<Event>,
}

fn between<R: Rng>(rng: &mut R, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    let span = (end - start).num_seconds().max(0);
    start + Duration::seconds(rng.gen_range(0..=span))
}

fn pick<'a, T, R: Rng>(rng: &mut R, items: &'a [T], weights: &[u32]) -> &'a T {
    match WeightedIndex::new(weights) {
        Ok(dist) => &items[dist.sample(rng)],
        Err(_) => &items[0],
    }
}

fn user<R: Rng>(rng: &mut R, index: usize, opts: &SeedOptions) -> User {
    let latest_join = (opts.end - Duration::days(7)).max(opts.start);
    let variant = if rng.gen_bool(0.5) { Variant::A } else { Variant::B };
    let mut user = User::new(
        format!("u_{:04}", index),
        between(rng, opts.start, latest_join),
        variant,
    )
    .with_tier(*pick(rng, &TIERS, &TIER_WEIGHTS));
    user.device = Some(pick(rng, &DEVICES, &DEVICE_WEIGHTS).to_string());
    user.country = Some(pick(rng, &COUNTRIES, &COUNTRY_WEIGHTS).to_string());
    user
}

fn activity<R: Rng>(rng: &mut R, user: &User, opts: &SeedOptions, out: &mut Vec<Event>) {
    let budget = match rng.gen_range(0..10) {
        0..=4 => rng.gen_range(1..=5),
        5..=7 => rng.gen_range(5..=20),
        _ => rng.gen_range(20..=80),
    };

    let signup = user.joined_at + Duration::minutes(rng.gen_range(0..=5));
    out.push(Event::new(&user.user_id, FUNNEL[0], signup).with_variant(user.ab_variant));
    let mut at = signup;
    let mut reached = 1;

    let boost = match user.ab_variant {
        Variant::A => 1.0,
        Variant::B => VARIANT_B_BOOST,
    };
    for (stage, p) in FUNNEL[1..].iter().zip(STAGE_PROBABILITIES) {
        if rng.gen::<f64>() >= p * boost {
            break;
        }
        at += Duration::minutes(rng.gen_range(1..=60));
        if at > opts.end {
            break;
        }
        out.push(Event::new(&user.user_id, *stage, at).with_variant(user.ab_variant));
        reached += 1;
    }

    let days = (opts.end - signup).num_days();
    if days <= 0 {
        return;
    }
    for _ in reached..budget {
        let ts = signup
            + Duration::days(rng.gen_range(0..=days))
            + Duration::hours(rng.gen_range(0..24))
            + Duration::minutes(rng.gen_range(1..60));
        if ts > opts.end {
            continue;
        }
        let name = ENGAGEMENT.choose(rng).copied().unwrap_or(FUNNEL[1]);
        out.push(Event::new(&user.user_id, name, ts).with_variant(user.ab_variant));
    }
}

/// Build users and their event histories. Deterministic for a seeded `rng`.
pub fn generate<R: Rng>(rng: &mut R, opts: &SeedOptions) -> Dataset {
    let users: Vec<User> = (1..=opts.users).map(|i| user(rng, i, opts)).collect();

    let mut events = Vec::new();
    for user in &users {
        activity(rng, user, opts, &mut events);
    }
    events.sort_by_key(|e| e.timestamp);

    Dataset { users, events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn small() -> SeedOptions {
        SeedOptions {
            users: 200,
            ..SeedOptions::default()
        }
    }

    #[test]
    fn test_every_user_signs_up_first() {
        let data = generate(&mut StdRng::seed_from_u64(7), &small());
        assert_eq!(data.users.len(), 200);
        for user in &data.users {
            let first = data
                .events
                .iter()
                .filter(|e| e.user_id == user.user_id)
                .min_by_key(|e| e.timestamp)
                .unwrap();
            assert_eq!(first.event_name, "signup_success");
            assert_eq!(first.variant, Some(user.ab_variant));
        }
    }

    #[test]
    fn test_events_sorted_and_in_range() {
        let opts = small();
        let data = generate(&mut StdRng::seed_from_u64(11), &opts);
        assert!(data.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(data.events.iter().all(|e| e.timestamp <= opts.end));
        assert!(data.users.iter().all(|u| u.joined_at >= opts.start && u.device.is_some()));
    }

    #[test]
    fn test_same_seed_same_dataset() {
        let a = generate(&mut StdRng::seed_from_u64(3), &small());
        let b = generate(&mut StdRng::seed_from_u64(3), &small());
        assert_eq!(a.users, b.users);
        assert_eq!(a.events, b.events);
    }
}
