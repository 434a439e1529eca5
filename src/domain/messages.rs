use super::booking::{now_millis, Booking, EventId};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Caller-facing failure categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Conflict,
    Malformed,
    Unavailable,
    Internal,
}

impl FailureKind {
    /// Only transport failures are worth another attempt; everything else is
    /// deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Unavailable)
    }

    pub fn is_business(&self) -> bool {
        matches!(self, FailureKind::NotFound | FailureKind::Conflict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Conflict => "conflict",
            FailureKind::Malformed => "malformed",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reason carried on the wire next to the free-text error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EventNotFound,
    AlreadyBooked,
    SoldOut,
    Malformed,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn kind(&self) -> FailureKind {
        match self {
            ErrorCode::EventNotFound => FailureKind::NotFound,
            ErrorCode::AlreadyBooked | ErrorCode::SoldOut => FailureKind::Conflict,
            ErrorCode::Malformed => FailureKind::Malformed,
            ErrorCode::Unavailable => FailureKind::Unavailable,
            ErrorCode::Internal => FailureKind::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EventNotFound => "event_not_found",
            ErrorCode::AlreadyBooked => "already_booked",
            ErrorCode::SoldOut => "sold_out",
            ErrorCode::Malformed => "malformed",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn event_not_found(event_id: EventId) -> Self {
        Self::new(ErrorCode::EventNotFound, format!("event {} not found", event_id))
    }

    pub fn already_booked(event_id: EventId, user_id: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyBooked,
            format!("user {} already booked for event {}", user_id, event_id),
        )
    }

    pub fn sold_out(event_id: EventId) -> Self {
        Self::new(ErrorCode::SoldOut, format!("no available seats for event {}", event_id))
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, reason)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, reason)
    }

    pub fn kind(&self) -> FailureKind {
        self.code.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationRequest {
    pub event_id: EventId,
    pub user_id: String,
    pub timestamp: i64,
}

impl ReservationRequest {
    pub fn new(event_id: EventId, user_id: &str) -> Self {
        Self {
            event_id,
            user_id: user_id.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an inbound payload. Anything that does not describe a usable
    /// request is reported as `Malformed`.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, Failure> {
        let request: ReservationRequest = serde_json::from_slice(payload)
            .map_err(|e| Failure::malformed(format!("invalid reservation request: {}", e)))?;

        if request.user_id.trim().is_empty() {
            return Err(Failure::malformed("user_id must not be empty"));
        }

        Ok(request)
    }
}

/// Wire shape of a reply: `data` iff success, `error`/`error_code` iff failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservationReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Booking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationOutcome {
    pub result: std::result::Result<Booking, Failure>,
    pub timestamp: i64,
}

impl ReservationOutcome {
    pub fn success(booking: Booking) -> Self {
        Self {
            result: Ok(booking),
            timestamp: now_millis(),
        }
    }

    pub fn failure(failure: Failure) -> Self {
        Self {
            result: Err(failure),
            timestamp: now_millis(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(Failure::kind)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&ReservationReply::from(self))?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let reply: ReservationReply = serde_json::from_slice(payload)?;
        Ok(reply.into())
    }
}

impl From<&ReservationOutcome> for ReservationReply {
    fn from(outcome: &ReservationOutcome) -> Self {
        match &outcome.result {
            Ok(booking) => ReservationReply {
                success: true,
                data: Some(booking.clone()),
                error: None,
                error_code: None,
                timestamp: outcome.timestamp,
            },
            Err(failure) => ReservationReply {
                success: false,
                data: None,
                error: Some(failure.message.clone()),
                error_code: Some(failure.code),
                timestamp: outcome.timestamp,
            },
        }
    }
}

impl From<ReservationReply> for ReservationOutcome {
    fn from(reply: ReservationReply) -> Self {
        let result = match (reply.success, reply.data) {
            (true, Some(booking)) => Ok(booking),
            (true, None) => Err(Failure::internal("successful reply carried no booking")),
            // A failure without a code is never classified from its text.
            (false, _) => Err(Failure::new(
                reply.error_code.unwrap_or(ErrorCode::Internal),
                reply.error.unwrap_or_else(|| "reservation failed".to_string()),
            )),
        };

        ReservationOutcome {
            result,
            timestamp: reply.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_missing_fields_and_blank_users() {
        let missing = ReservationRequest::decode(br#"{"event_id": 1}"#).unwrap_err();
        assert_eq!(missing.kind(), FailureKind::Malformed);

        let blank = ReservationRequest::decode(br#"{"event_id": 1, "user_id": " ", "timestamp": 0}"#)
            .unwrap_err();
        assert_eq!(blank.code, ErrorCode::Malformed);

        let not_json = ReservationRequest::decode(b"reserve please").unwrap_err();
        assert_eq!(not_json.kind(), FailureKind::Malformed);
    }

    #[test]
    fn failure_reply_keeps_code_and_omits_data() {
        let outcome = ReservationOutcome::failure(Failure::sold_out(7));
        let json: serde_json::Value = serde_json::from_slice(&outcome.encode().unwrap()).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "no available seats for event 7");
        assert_eq!(json["error_code"], "sold_out");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn reply_without_code_is_internal_regardless_of_text() {
        let outcome = ReservationOutcome::decode(
            br#"{"success": false, "error": "user a already booked for event 1", "timestamp": 1}"#,
        )
        .unwrap();

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Internal));
    }

    #[test]
    fn error_codes_map_onto_failure_kinds() {
        assert_eq!(ErrorCode::EventNotFound.kind(), FailureKind::NotFound);
        assert_eq!(ErrorCode::AlreadyBooked.kind(), FailureKind::Conflict);
        assert_eq!(ErrorCode::SoldOut.kind(), FailureKind::Conflict);
        assert!(FailureKind::Unavailable.is_retryable());
        assert!(!FailureKind::Conflict.is_retryable());
        assert!(!FailureKind::Internal.is_retryable());
    }
}
