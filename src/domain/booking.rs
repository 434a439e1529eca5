use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EventId = i64;
pub type BookingId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    #[serde(default)]
    pub name: String,
    pub total_seats: u32,
}

impl Event {
    pub fn new(id: EventId, name: impl Into<String>, total_seats: u32) -> Self {
        Self {
            id,
            name: name.into(),
            total_seats,
        }
    }
}

/// A durable claim by one user on one seat of one event. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub event_id: EventId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(id: BookingId, event_id: EventId, user_id: &str) -> Self {
        Self {
            id,
            event_id,
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

// Utility functions for key generation
pub fn event_key(event_id: EventId) -> String {
    format!("event#{}", event_id)
}

pub fn booking_key(event_id: EventId, user_id: &str) -> String {
    format!("booking#{}#{}", event_id, user_id)
}

pub fn booked_count_key(event_id: EventId) -> String {
    format!("booked#{}", event_id)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
