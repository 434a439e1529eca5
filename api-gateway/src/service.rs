use seat_booking::{
    Confirmation, EventId, Failure, Metrics, ReservationRequester, ServiceConfig, Transport,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct GatewayService {
    requester: ReservationRequester,
    retry_enabled: bool,
}

impl GatewayService {
    pub fn new(transport: Arc<dyn Transport>, config: &ServiceConfig, metrics: Metrics) -> Self {
        let retry_enabled = config.booking.retry_enabled();
        if retry_enabled {
            info!(
                "Reservation retries enabled ({} attempts)",
                config.booking.retry_max_attempts
            );
        }

        Self {
            requester: ReservationRequester::new(transport, &config.booking, metrics),
            retry_enabled,
        }
    }

    pub async fn reserve(&self, event_id: EventId, user_id: &str) -> Result<Confirmation, Failure> {
        let timeout = self.requester.timeout();

        if self.retry_enabled {
            self.requester
                .request_reservation_with_retry(event_id, user_id, timeout)
                .await
        } else {
            self.requester
                .request_reservation(event_id, user_id, timeout)
                .await
                .map(Confirmation::Booked)
        }
    }
}
