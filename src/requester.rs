use crate::{
    retry_with_backoff, Booking, BookingConfig, BookingError, ErrorCode, EventId, Failure, Metrics,
    ReservationOutcome, ReservationRequest, RetryConfig, Transport,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a reservation made with retries.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Booked(Booking),
    /// An earlier attempt whose reply was lost already booked the seat; a
    /// retry then saw `already_booked`. The user holds a seat either way.
    PreviouslyBooked { event_id: EventId, user_id: String },
}

/// Gateway-side client for the reservation round trip.
#[derive(Clone)]
pub struct ReservationRequester {
    transport: Arc<dyn Transport>,
    subject: String,
    timeout: Duration,
    retry: RetryConfig,
    metrics: Metrics,
}

impl ReservationRequester {
    pub fn new(transport: Arc<dyn Transport>, config: &BookingConfig, metrics: Metrics) -> Self {
        Self {
            transport,
            subject: config.reserve_subject.clone(),
            timeout: config.request_timeout(),
            retry: RetryConfig::reservation(config),
            metrics,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One round trip. Transport faults and timeouts come back as
    /// `Unavailable`; everything else is the responder's verdict.
    pub async fn request_reservation(
        &self,
        event_id: EventId,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Booking, Failure> {
        let request = ReservationRequest::new(event_id, user_id);
        let payload = request
            .encode()
            .map_err(|e| Failure::internal(format!("failed to encode reservation request: {}", e)))?;

        info!("Sending reservation request for user {} on event {}", user_id, event_id);

        let started = Instant::now();
        let reply = self.transport.request(&self.subject, payload, timeout).await;
        self.metrics.record_request(
            started.elapsed(),
            matches!(reply, Err(BookingError::Timeout { .. })),
        );

        let reply = reply.map_err(|e| {
            warn!("Reservation request for user {} on event {} failed: {}", user_id, event_id, e);
            if e.is_transport_fault() {
                Failure::unavailable("reservation service unavailable")
            } else {
                Failure::internal(format!("reservation request failed: {}", e))
            }
        })?;

        let outcome = ReservationOutcome::decode(&reply)
            .map_err(|e| Failure::internal(format!("undecodable reservation reply: {}", e)))?;

        outcome.result
    }

    /// Like [`request_reservation`](Self::request_reservation) but retries
    /// `Unavailable` with exponential backoff. Business failures are never
    /// retried; each retry is a fresh round trip.
    pub async fn request_reservation_with_retry(
        &self,
        event_id: EventId,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Confirmation, Failure> {
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let this = self;

        retry_with_backoff(
            &self.retry,
            "reservation request",
            move || async move {
                let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > 1 {
                    this.metrics.record_retry();
                }

                match this.request_reservation(event_id, user_id, timeout).await {
                    Ok(booking) => Ok(Confirmation::Booked(booking)),
                    Err(failure) if attempt > 1 && failure.code == ErrorCode::AlreadyBooked => {
                        info!(
                            "Retry for user {} on event {} found an existing booking",
                            user_id, event_id
                        );
                        Ok(Confirmation::PreviouslyBooked {
                            event_id,
                            user_id: user_id.to_string(),
                        })
                    }
                    Err(failure) => Err(failure),
                }
            },
            |failure: &Failure| failure.kind().is_retryable(),
        )
        .await
    }
}
