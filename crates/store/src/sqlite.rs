//! SQLite-backed event log.
//!
//! Queries run on a blocking thread and feed rows through a bounded channel, so
//! a slow scan suspends the consuming task instead of pinning a worker.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use vizsprints_core::config::StoreConfig;
use vizsprints_core::{AnalyticsError, AnalyticsResult, Event, SubscriptionTier, User, Variant};

use crate::filter::{EventFilter, UserFilter};
use crate::{EventStore, EventStream, UserStream};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    joined_at TEXT NOT NULL,
    device TEXT,
    country TEXT,
    subscription_status TEXT NOT NULL DEFAULT 'Free',
    ab_variant TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    event_id TEXT,
    user_id TEXT NOT NULL,
    event_name TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    variant TEXT,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_user_id ON events(user_id);
CREATE INDEX IF NOT EXISTS idx_events_event_name ON events(event_name);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
";

type RowMapper<T> = fn(&Row<'_>) -> AnalyticsResult<T>;

/// Event log in a SQLite file.
///
/// Every stream reads through its own read-only connection, and its open
/// cursor holds a shared lock, so one stream never observes a partial write.
/// Streams of the same request are separate reads: the file must not be
/// written while queries are served.
pub struct SqliteEventStore {
    path: PathBuf,
    channel_capacity: usize,
}

impl SqliteEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channel_capacity: 1024,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.database_path).with_channel_capacity(config.channel_capacity)
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_read_write(&self) -> AnalyticsResult<Connection> {
        Connection::open(&self.path).map_err(db_err)
    }

    /// Create the `users` and `events` tables and their indices if missing.
    ///
    /// Databases loaded by the legacy CSV importer have no `events.variant`
    /// column; it is added empty so queries fall back to the user's arm.
    pub fn init_schema(&self) -> AnalyticsResult<()> {
        let conn = self.open_read_write()?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        if !has_column(&conn, "events", "variant")? {
            conn.execute_batch("ALTER TABLE events ADD COLUMN variant TEXT")
                .map_err(db_err)?;
            info!(path = %self.path.display(), "Added events.variant column");
        }
        info!(path = %self.path.display(), "SQLite event store schema verified");
        Ok(())
    }

    /// Bulk-insert users in one transaction. Insertion order is store order.
    pub fn insert_users(&self, users: &[User]) -> AnalyticsResult<usize> {
        let mut conn = self.open_read_write()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO users (user_id, joined_at, device, country, subscription_status, ab_variant)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;
            for user in users {
                stmt.execute(params![
                    user.user_id,
                    format_timestamp(&user.joined_at),
                    user.device,
                    user.country,
                    user.subscription_status.as_str(),
                    user.ab_variant.as_str(),
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!(count = users.len(), "Inserted users");
        Ok(users.len())
    }

    /// Bulk-insert events in one transaction. Insertion order is store order.
    pub fn insert_events(&self, events: &[Event]) -> AnalyticsResult<usize> {
        let mut conn = self.open_read_write()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO events (event_id, user_id, event_name, timestamp, variant)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(db_err)?;
            for (i, event) in events.iter().enumerate() {
                stmt.execute(params![
                    format!("e_{}", i + 1),
                    event.user_id,
                    event.event_name,
                    format_timestamp(&event.timestamp),
                    event.variant.map(|v| v.as_str()),
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!(count = events.len(), "Inserted events");
        Ok(events.len())
    }

    fn stream_rows<T>(
        &self,
        sql: String,
        args: Vec<Value>,
        map: RowMapper<T>,
    ) -> Pin<Box<dyn Stream<Item = AnalyticsResult<T>> + Send>>
    where
        T: Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                return Box::pin(tokio_stream::once(Err(AnalyticsError::unavailable(
                    format!("no async runtime to drive the SQLite cursor: {e}"),
                ))))
            }
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let path = self.path.clone();
        handle.spawn_blocking(move || {
            if let Err(e) = pump_rows(&path, &sql, &args, map, &tx) {
                metrics::counter!("store.query_errors").increment(1);
                warn!(error = %e, path = %path.display(), "SQLite query failed");
                let _ = tx.blocking_send(Err(e));
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

impl EventStore for SqliteEventStore {
    fn query(&self, filter: &EventFilter) -> EventStream {
        let (sql, args) = events_sql(filter);
        debug!(sql = %sql, "Streaming events from SQLite");
        self.stream_rows(sql, args, event_from_row)
    }

    fn users(&self, filter: &UserFilter) -> UserStream {
        let (sql, args) = users_sql(filter);
        self.stream_rows(sql, args, user_from_row)
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> AnalyticsResult<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(db_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(db_err)?;
    for name in names {
        if name.map_err(db_err)? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn users_sql(filter: &UserFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args = Vec::new();

    if let Some(country) = &filter.country {
        clauses.push("country = ?");
        args.push(Value::Text(country.clone()));
    }
    if let Some(device) = &filter.device {
        clauses.push("device = ?");
        args.push(Value::Text(device.clone()));
    }
    if let Some(tier) = filter.subscription_status {
        clauses.push("subscription_status = ?");
        args.push(Value::Text(tier.as_str().to_string()));
    }

    let mut sql = String::from(
        "SELECT user_id, joined_at, ab_variant, device, country, subscription_status FROM users",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY rowid");
    if let Some(cap) = filter.cap() {
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(cap as i64));
    }
    (sql, args)
}

/// Build the event query with every filter pushed into SQL.
fn events_sql(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args = Vec::new();

    if let Some(cap) = filter.user_cap() {
        clauses.push("e.user_id IN (SELECT user_id FROM users ORDER BY rowid LIMIT ?)");
        args.push(Value::Integer(cap as i64));
    }
    if let Some(variant) = filter.variant {
        clauses.push("COALESCE(e.variant, u.ab_variant) = ?");
        args.push(Value::Text(variant.as_str().to_string()));
    }
    if let Some(user_id) = &filter.user_id {
        clauses.push("e.user_id = ?");
        args.push(Value::Text(user_id.clone()));
    }
    if let Some(event_name) = &filter.event_name {
        clauses.push("e.event_name = ?");
        args.push(Value::Text(event_name.clone()));
    }
    if let Some(start) = filter.start {
        clauses.push("e.timestamp >= ?");
        args.push(Value::Text(format_timestamp(&start)));
    }
    if let Some(end) = filter.end {
        clauses.push("e.timestamp <= ?");
        args.push(Value::Text(format_timestamp(&end)));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let base = "SELECT e.user_id AS user_id, e.event_name AS event_name, e.timestamp AS timestamp, \
                COALESCE(e.variant, u.ab_variant) AS variant, e.rowid AS seq";
    let from = "FROM events e LEFT JOIN users u ON u.user_id = e.user_id";

    let sql = match filter.per_user_cap() {
        Some(cap) => {
            args.push(Value::Integer(cap as i64));
            format!(
                "SELECT user_id, event_name, timestamp, variant FROM (
                    {base}, ROW_NUMBER() OVER (PARTITION BY e.user_id ORDER BY e.rowid) AS nth
                    {from}{where_sql}
                 ) WHERE nth <= ? ORDER BY seq"
            )
        }
        None => format!("{base} {from}{where_sql} ORDER BY seq"),
    };
    (sql, args)
}

fn pump_rows<T>(
    path: &Path,
    sql: &str,
    args: &[Value],
    map: RowMapper<T>,
    tx: &mpsc::Sender<AnalyticsResult<T>>,
) -> AnalyticsResult<()> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(db_err)?;
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let mut rows = stmt.query(params_from_iter(args.iter())).map_err(db_err)?;

    let mut sent = 0u64;
    while let Some(row) = rows.next().map_err(db_err)? {
        let item = map(row)?;
        if tx.blocking_send(Ok(item)).is_err() {
            debug!(sent, "Stream receiver dropped, closing SQLite cursor");
            return Ok(());
        }
        sent += 1;
    }
    debug!(rows = sent, "SQLite cursor drained");
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> AnalyticsResult<Event> {
    let raw_ts: String = row.get(2).map_err(db_err)?;
    let variant: Option<String> = row.get(3).map_err(db_err)?;
    Ok(Event {
        user_id: row.get(0).map_err(db_err)?,
        event_name: row.get(1).map_err(db_err)?,
        timestamp: parse_timestamp(&raw_ts)?,
        variant: variant
            .as_deref()
            .map(parse_stored::<Variant>)
            .transpose()?,
    })
}

fn user_from_row(row: &Row<'_>) -> AnalyticsResult<User> {
    let joined_at: String = row.get(1).map_err(db_err)?;
    let variant: String = row.get(2).map_err(db_err)?;
    let tier: String = row.get(5).map_err(db_err)?;
    Ok(User {
        user_id: row.get(0).map_err(db_err)?,
        joined_at: parse_timestamp(&joined_at)?,
        ab_variant: parse_stored::<Variant>(&variant)?,
        device: row.get(3).map_err(db_err)?,
        country: row.get(4).map_err(db_err)?,
        subscription_status: parse_stored::<SubscriptionTier>(&tier)?,
    })
}

/// A value the store holds but cannot decode is a store fault, not a caller fault.
fn parse_stored<T>(raw: &str) -> AnalyticsResult<T>
where
    T: std::str::FromStr<Err = AnalyticsError>,
{
    raw.parse()
        .map_err(|e: AnalyticsError| AnalyticsError::unavailable(format!("malformed row: {e}")))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 and the space-separated form pandas writes.
fn parse_timestamp(raw: &str) -> AnalyticsResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| AnalyticsError::unavailable(format!("malformed timestamp '{raw}'")))
}

fn db_err(e: rusqlite::Error) -> AnalyticsError {
    AnalyticsError::unavailable(e.to_string())
}
