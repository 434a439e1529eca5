use crate::{
    Booking, BookingConfig, BookingError, BookingStore, DomainEvent, EventId, Failure, Metrics,
    ReservationOutcome, Transport,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

/// One async mutex per event. Reservations for the same event run their
/// check-and-insert one at a time; different events never wait on each other.
///
/// An entry lives only while someone holds or waits for it, so the map never
/// grows past the number of events with reservations in flight.
#[derive(Default)]
pub struct EventLocks {
    locks: DashMap<EventId, Arc<Mutex<()>>>,
}

/// Held for the duration of one check-and-insert. Dropping it releases the
/// event and prunes the entry when nobody else is queued on it.
pub struct EventLockGuard<'a> {
    locks: &'a EventLocks,
    event_id: EventId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EventLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, event_id: EventId) -> EventLockGuard<'_> {
        // Clone out of the map first; never hold a shard lock across an await.
        let lock = self.locks.entry(event_id).or_default().clone();
        let guard = lock.lock_owned().await;
        EventLockGuard {
            locks: self,
            event_id,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for EventLockGuard<'_> {
    fn drop(&mut self) {
        // The guard owns a clone of the Arc; release it before counting.
        self.guard.take();
        // Runs under the shard lock, so no acquirer can clone the entry between
        // the count and the removal.
        self.locks
            .locks
            .remove_if(&self.event_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Decides whether a seat may be booked and records the booking.
///
/// Invariants, per event: at most `total_seats` bookings, at most one booking
/// per user. The per-event lock serialises steps 1-4 inside this process and
/// the store's uniqueness check backs up the duplicate rule on its own.
pub struct ReservationEngine {
    store: Arc<dyn BookingStore>,
    transport: Arc<dyn Transport>,
    locks: EventLocks,
    created_subject: String,
    failed_subject: String,
    metrics: Metrics,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        transport: Arc<dyn Transport>,
        config: &BookingConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            transport,
            locks: EventLocks::new(),
            created_subject: config.created_subject.clone(),
            failed_subject: config.failed_subject.clone(),
            metrics,
        }
    }

    /// Never fails past this boundary: every path ends in an outcome.
    pub async fn reserve(&self, event_id: EventId, user_id: &str) -> ReservationOutcome {
        let started = Instant::now();

        let outcome = match self.check_and_insert(event_id, user_id).await {
            Ok(booking) => {
                info!("Created booking {} for user {} on event {}", booking.id, user_id, event_id);
                self.publish(&self.created_subject, DomainEvent::booking_created(&booking)).await;
                ReservationOutcome::success(booking)
            }
            Err(failure) => {
                if failure.kind().is_business() {
                    info!("Reservation rejected for user {} on event {}: {}", user_id, event_id, failure);
                } else {
                    error!("Reservation failed for user {} on event {}: {}", user_id, event_id, failure);
                }
                self.publish(&self.failed_subject, DomainEvent::booking_failed(event_id, user_id, &failure))
                    .await;
                ReservationOutcome::failure(failure)
            }
        };

        self.metrics.record_reservation(&outcome, started.elapsed());
        outcome
    }

    async fn check_and_insert(&self, event_id: EventId, user_id: &str) -> Result<Booking, Failure> {
        let _guard = self.locks.acquire(event_id).await;

        let event = self
            .store
            .find_event(event_id)
            .await
            .map_err(|e| store_fault("load event", e))?
            .ok_or_else(|| Failure::event_not_found(event_id))?;

        let existing = self
            .store
            .find_booking(event_id, user_id)
            .await
            .map_err(|e| store_fault("look up booking", e))?;
        if existing.is_some() {
            return Err(Failure::already_booked(event_id, user_id));
        }

        let booked = self
            .store
            .count_bookings(event_id)
            .await
            .map_err(|e| store_fault("count bookings", e))?;
        if booked >= u64::from(event.total_seats) {
            return Err(Failure::sold_out(event_id));
        }

        match self.store.insert_booking(event_id, user_id).await {
            Ok(booking) => Ok(booking),
            Err(BookingError::DuplicateBooking { .. }) => {
                warn!("Uniqueness constraint rejected user {} on event {}", user_id, event_id);
                Err(Failure::already_booked(event_id, user_id))
            }
            Err(e) => Err(store_fault("insert booking", e)),
        }
    }

    /// Best effort: a lost domain event never undoes a booking.
    async fn publish(&self, subject: &str, event: DomainEvent) {
        let result = match event.encode() {
            Ok(payload) => self.transport.publish(subject, payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.metrics.record_publish(true),
            Err(e) => {
                self.metrics.record_publish(false);
                warn!("Failed to publish {} to {}: {}", event.event_type(), subject, e);
            }
        }
    }
}

fn store_fault(operation: &str, error: BookingError) -> Failure {
    error!("Store failure during {}: {}", operation, error);
    Failure::internal("internal error while reserving seat")
}
