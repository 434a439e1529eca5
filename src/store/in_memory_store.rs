use super::BookingStore;
use crate::{Booking, BookingError, Event, EventId, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    events: Arc<DashMap<EventId, Event>>,
    bookings: Arc<DashMap<(EventId, String), Booking>>,
    booked: Arc<DashMap<EventId, u64>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        for event in events {
            store.events.insert(event.id, event);
        }
        store
    }

    pub fn bookings_for(&self, event_id: EventId) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|entry| entry.key().0 == event_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>> {
        Ok(self.events.get(&event_id).map(|entry| entry.value().clone()))
    }

    async fn find_booking(&self, event_id: EventId, user_id: &str) -> Result<Option<Booking>> {
        Ok(self
            .bookings
            .get(&(event_id, user_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn count_bookings(&self, event_id: EventId) -> Result<u64> {
        Ok(self.booked.get(&event_id).map(|count| *count).unwrap_or(0))
    }

    async fn insert_booking(&self, event_id: EventId, user_id: &str) -> Result<Booking> {
        match self.bookings.entry((event_id, user_id.to_string())) {
            Entry::Occupied(_) => Err(BookingError::DuplicateBooking {
                event_id,
                user_id: user_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let booking = Booking::new(id, event_id, user_id);
                slot.insert(booking.clone());
                *self.booked.entry(event_id).or_insert(0) += 1;
                Ok(booking)
            }
        }
    }

    async fn upsert_event(&self, event: Event) -> Result<()> {
        self.events.insert(event.id, event);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
