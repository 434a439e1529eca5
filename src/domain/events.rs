use super::booking::{Booking, BookingId, EventId};
use super::messages::Failure;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facts published for downstream consumers (notifications, analytics).
/// Never stored by the reservation side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "booking.created")]
    BookingCreated(BookingCreated),
    #[serde(rename = "booking.failed")]
    BookingFailed(BookingFailed),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking_id: BookingId,
    pub event_id: EventId,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingFailed {
    pub event_id: EventId,
    pub user_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn booking_created(booking: &Booking) -> Self {
        DomainEvent::BookingCreated(BookingCreated {
            booking_id: booking.id,
            event_id: booking.event_id,
            user_id: booking.user_id.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn booking_failed(event_id: EventId, user_id: &str, failure: &Failure) -> Self {
        DomainEvent::BookingFailed(BookingFailed {
            event_id,
            user_id: user_id.to_string(),
            error: failure.message.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::BookingCreated(_) => "booking.created",
            DomainEvent::BookingFailed(_) => "booking.failed",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_created_uses_camel_case_envelope() {
        let booking = Booking::new(42, 3, "alice");
        let event = DomainEvent::booking_created(&booking);
        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "booking.created");
        assert_eq!(json["data"]["bookingId"], 42);
        assert_eq!(json["data"]["eventId"], 3);
        assert_eq!(json["data"]["userId"], "alice");
        assert!(json["data"]["timestamp"].as_str().unwrap().contains('T'));
    }
}
