//! VizSprints — product analytics reporting over the event log.
//!
//! Opens the SQLite event store, runs a single report and prints it as JSON.

mod seed;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;
use vizsprints_core::{AppConfig, SubscriptionTier};
use vizsprints_reporting::{AbInput, AnalyticsEngine, KpiWindow, SessionSort};
use vizsprints_store::{EventFilter, SqliteEventStore, UserFilter};

#[derive(Parser, Debug)]
#[command(name = "vizsprints")]
#[command(about = "Funnel, cohort, KPI and A/B reporting over product events")]
#[command(version)]
struct Cli {
    /// SQLite database path (overrides config)
    #[arg(long, env = "VIZSPRINTS__STORE__DATABASE_PATH")]
    database: Option<String>,

    /// Pretty-print the JSON response
    #[arg(long, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stage-by-stage funnel conversion
    Funnel,

    /// Monthly signup cohorts and their retention
    Cohorts,

    /// Daily active users and signups
    Kpi {
        /// First day of the window (YYYY-MM-DD)
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,

        /// Last day of the window (YYYY-MM-DD)
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,
    },

    /// Compare variants A and B
    AbTest {
        /// One of 0.90, 0.95, 0.99 (defaults to config)
        #[arg(long)]
        confidence_level: Option<f64>,

        /// Sample only the first N users
        #[arg(long)]
        limit: Option<usize>,

        /// At most N events per user
        #[arg(long)]
        event_limit: Option<usize>,

        /// Simulation: users in variant A
        #[arg(long, requires_all = ["manual_n_b", "manual_conv_a", "manual_conv_b"])]
        manual_n_a: Option<i64>,

        /// Simulation: users in variant B
        #[arg(long, requires = "manual_n_a")]
        manual_n_b: Option<i64>,

        /// Simulation: conversion percentage of A
        #[arg(long, requires = "manual_n_a")]
        manual_conv_a: Option<f64>,

        /// Simulation: conversion percentage of B
        #[arg(long, requires = "manual_n_a")]
        manual_conv_b: Option<f64>,
    },

    /// Headline dashboard metrics
    Metrics,

    /// Ranked per-user session summaries
    Sessions {
        /// Number of users to return (defaults to config)
        #[arg(long)]
        limit: Option<usize>,

        /// total_hours, total_sessions or last_activity
        #[arg(long, default_value = "total_hours")]
        sort_by: String,
    },

    /// Registered users, optionally filtered by attribute
    Users {
        #[arg(long)]
        country: Option<String>,

        #[arg(long)]
        device: Option<String>,

        /// Free, Premium or Enterprise
        #[arg(long)]
        subscription_status: Option<SubscriptionTier>,

        /// Return at most N users
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Raw events, optionally filtered (page size from config)
    Events {
        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        event_name: Option<String>,

        /// Earliest timestamp (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Latest timestamp (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },

    /// Create the database schema
    Init,

    /// Create the schema and load a synthetic dataset
    Seed {
        /// Number of users to generate
        #[arg(long, default_value_t = 1000)]
        users: usize,

        /// RNG seed for a reproducible dataset
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vizsprints=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(path) = cli.database {
        config.store.database_path = path;
    }

    info!(
        database = %config.store.database_path,
        funnel_stages = config.funnel.stages.len(),
        "Configuration loaded"
    );

    let store = SqliteEventStore::from_config(&config.store);

    match cli.command {
        Commands::Init => {
            store.init_schema()?;
            info!(path = %store.path().display(), "Schema ready");
            return Ok(());
        }
        Commands::Seed {
            users,
            seed: rng_seed,
        } => {
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let opts = seed::SeedOptions {
                users,
                ..seed::SeedOptions::default()
            };
            let data = seed::generate(&mut rng, &opts);
            store.init_schema()?;
            let users = store.insert_users(&data.users)?;
            let events = store.insert_events(&data.events)?;
            info!(users, events, path = %store.path().display(), "Synthetic dataset loaded");
            return Ok(());
        }
        _ => {}
    }

    // Older databases predate the event variant column
    if store.path().exists() {
        store.init_schema()?;
    }

    let engine = AnalyticsEngine::new(Arc::new(store), config.clone())
        .context("invalid funnel configuration")?;

    match cli.command {
        Commands::Funnel => emit(&engine.funnel().await?, cli.pretty)?,
        Commands::Cohorts => emit(&engine.cohorts().await?, cli.pretty)?,
        Commands::Kpi { start, end } => {
            let window = match (start, end) {
                (Some(start), Some(end)) => Some(KpiWindow::new(start, end)?),
                _ => None,
            };
            emit(&engine.kpi_time_series(window).await?, cli.pretty)?
        }
        Commands::AbTest {
            confidence_level,
            limit,
            event_limit,
            manual_n_a,
            manual_n_b,
            manual_conv_a,
            manual_conv_b,
        } => {
            let confidence_level =
                confidence_level.unwrap_or(config.ab_test.default_confidence_level);
            let input = match (manual_n_a, manual_n_b, manual_conv_a, manual_conv_b) {
                (Some(n_a), Some(n_b), Some(conv_a), Some(conv_b)) => AbInput::Simulation {
                    n_a,
                    n_b,
                    conv_rate_a_pct: conv_a,
                    conv_rate_b_pct: conv_b,
                    confidence_level,
                },
                _ => AbInput::Live {
                    sample_limit: limit,
                    event_limit,
                    confidence_level,
                },
            };
            emit(&engine.ab_test(&input).await?, cli.pretty)?
        }
        Commands::Metrics => emit(&engine.metrics().await?, cli.pretty)?,
        Commands::Sessions { limit, sort_by } => {
            let sort: SessionSort = sort_by.parse()?;
            emit(&engine.user_sessions(sort, limit).await?, cli.pretty)?
        }
        Commands::Users {
            country,
            device,
            subscription_status,
            limit,
        } => {
            let filter = UserFilter {
                limit,
                country,
                device,
                subscription_status,
            };
            emit(&engine.list_users(&filter).await?, cli.pretty)?
        }
        Commands::Events {
            user_id,
            event_name,
            start,
            end,
        } => {
            let filter = EventFilter {
                user_id,
                event_name,
                ..EventFilter::new()
            }
            .within(start, end);
            emit(&engine.list_events(&filter).await?, cli.pretty)?
        }
        Commands::Init | Commands::Seed { .. } => {}
    }

    Ok(())
}
