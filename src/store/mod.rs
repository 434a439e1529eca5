pub mod in_memory_store;
pub mod rocksdb_store;

pub use in_memory_store::*;
pub use rocksdb_store::*;

use crate::{Booking, Event, EventId, Result};
use async_trait::async_trait;

/// Persistence for events and bookings.
///
/// `insert_booking` must reject a second booking for the same
/// `(event_id, user_id)` pair with `BookingError::DuplicateBooking`, whatever
/// the caller checked beforehand.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>>;

    async fn find_booking(&self, event_id: EventId, user_id: &str) -> Result<Option<Booking>>;

    async fn count_bookings(&self, event_id: EventId) -> Result<u64>;

    async fn insert_booking(&self, event_id: EventId, user_id: &str) -> Result<Booking>;

    /// Seeding hook for events owned by the catalog side.
    async fn upsert_event(&self, event: Event) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}
