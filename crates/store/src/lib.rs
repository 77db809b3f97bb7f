//! Event Store Adapter — streaming query access to the raw event log.
//!
//! Stores hand back lazy streams; sample and cap filters are applied inside the
//! store so no aggregation ever sees more rows than the request allows.

pub mod filter;
pub mod memory;
pub mod sqlite;

use std::pin::Pin;

use tokio_stream::Stream;
use vizsprints_core::{AnalyticsResult, Event, User};

pub use filter::{EventFilter, UserFilter};
pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

pub type EventStream = Pin<Box<dyn Stream<Item = AnalyticsResult<Event>> + Send>>;
pub type UserStream = Pin<Box<dyn Stream<Item = AnalyticsResult<User>> + Send>>;

/// Read-only query capability over the event log.
///
/// Implementations must give a repeatable-read view for the lifetime of a
/// returned stream. A request that opens several streams sees one snapshot
/// only while the backing data is not written concurrently; writers must be
/// quiesced while queries are served. Failures to reach the backing store
/// surface as a `DataUnavailable` item on the stream; nothing is retried here.
pub trait EventStore: Send + Sync {
    /// Events passing `filter`, in store order, with `variant` resolved from
    /// the user table when the event itself carries none.
    fn query(&self, filter: &EventFilter) -> EventStream;

    /// Registered users matching `filter`, in store order.
    fn users(&self, filter: &UserFilter) -> UserStream;
}
