use crate::{
    BookingConfig, Failure, InboundMessage, Metrics, ReplyAddress, ReservationEngine,
    ReservationOutcome, ReservationRequest, Result, Subscription, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service-side loop: one subscription on the reservation subject, one
/// spawned task per accepted request, exactly one reply per request.
///
/// In-flight reservations are capped by a semaphore so a burst of inbound
/// messages cannot exhaust the store. On shutdown, requests still buffered in
/// the subscription are answered `unavailable` so their callers can retry.
pub struct ReservationResponder {
    transport: Arc<dyn Transport>,
    engine: Arc<ReservationEngine>,
    subject: String,
    limiter: Arc<Semaphore>,
    max_in_flight: usize,
    drain_timeout: Duration,
    metrics: Metrics,
}

/// What the receive loop should do after handing a message off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Stop,
}

impl ReservationResponder {
    pub fn new(
        transport: Arc<dyn Transport>,
        engine: Arc<ReservationEngine>,
        config: &BookingConfig,
        metrics: Metrics,
    ) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            transport,
            engine,
            subject: config.reserve_subject.clone(),
            limiter: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            drain_timeout: DRAIN_TIMEOUT,
            metrics,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let subscription = self.transport.subscribe(&self.subject).await?;
        self.serve(subscription, shutdown).await
    }

    /// Receive loop over an existing subscription. Returns after shutdown
    /// (or the end of the subscription) once every received request has
    /// been answered.
    pub async fn serve(&self, mut subscription: Subscription, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Reservation responder listening on {}", subscription.subject());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Reservation responder received shutdown signal");
                    break;
                }

                message = subscription.next() => {
                    match message {
                        Some(message) => {
                            if self.dispatch(message, &mut shutdown).await == Dispatch::Stop {
                                info!("Reservation responder received shutdown signal while at capacity");
                                break;
                            }
                        }
                        None => {
                            warn!("Subscription to {} ended", self.subject);
                            break;
                        }
                    }
                }
            }
        }

        self.reject_buffered(&mut subscription).await;
        self.drain(self.drain_timeout).await;
        info!("Reservation responder stopped");
        Ok(())
    }

    /// Hand one inbound message off without waiting for its reservation.
    /// Only waits when every in-flight slot is taken, and gives up on the
    /// slot if shutdown arrives first.
    pub async fn dispatch(
        &self,
        message: InboundMessage,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Dispatch {
        self.metrics.record_received();

        let Some(reply_to) = message.reply_to else {
            warn!("Dropping message on {} without a reply address", message.subject);
            return Dispatch::Continue;
        };

        let request = match ReservationRequest::decode(&message.payload) {
            Ok(request) => request,
            Err(failure) => {
                warn!("Rejecting malformed reservation request: {}", failure);
                self.spawn_reply(reply_to, failure);
                return Dispatch::Continue;
            }
        };

        let permit = tokio::select! {
            permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.spawn_reply(reply_to, Failure::internal("reservation service is shutting down"));
                    return Dispatch::Continue;
                }
            },
            _ = shutdown.recv() => {
                send_reply(self.transport.as_ref(), reply_to, shutting_down()).await;
                return Dispatch::Stop;
            }
        };

        let transport = Arc::clone(&self.transport);
        let engine = Arc::clone(&self.engine);
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;
            metrics.reservation_started();

            let event_id = request.event_id;
            let user_id = request.user_id.clone();

            // Run the engine in its own task so a panic lands here as a
            // JoinError instead of losing the reply.
            let work = tokio::spawn(async move {
                engine.reserve(request.event_id, &request.user_id).await
            });

            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Reservation task for user {} on event {} aborted: {}", user_id, event_id, e);
                    ReservationOutcome::failure(Failure::internal("reservation aborted unexpectedly"))
                }
            };

            metrics.reservation_finished();
            send_reply(transport.as_ref(), reply_to, outcome).await;
        });

        Dispatch::Continue
    }

    /// Answer whatever the subscription had already buffered when the loop
    /// stopped, without starting new reservations.
    async fn reject_buffered(&self, subscription: &mut Subscription) {
        subscription.close();

        let mut rejected = 0;
        while let Some(message) = subscription.next().await {
            self.metrics.record_received();
            match message.reply_to {
                Some(reply_to) => {
                    send_reply(self.transport.as_ref(), reply_to, shutting_down()).await;
                    rejected += 1;
                }
                None => warn!("Dropping message on {} without a reply address", message.subject),
            }
        }

        if rejected > 0 {
            info!("Rejected {} buffered reservation requests during shutdown", rejected);
        }
    }

    fn spawn_reply(&self, reply_to: ReplyAddress, failure: Failure) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            send_reply(transport.as_ref(), reply_to, ReservationOutcome::failure(failure)).await;
        });
    }

    /// Wait until every dispatched reservation has replied.
    pub async fn drain(&self, timeout: Duration) {
        let permits = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.limiter.acquire_many(permits)).await {
            Ok(Ok(_all)) => info!("All in-flight reservations completed"),
            Ok(Err(_)) => warn!("Reservation limiter closed while draining"),
            Err(_) => warn!(
                "{} reservations still in flight after {:?}",
                self.in_flight(),
                timeout
            ),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.limiter.available_permits()
    }
}

fn shutting_down() -> ReservationOutcome {
    ReservationOutcome::failure(Failure::unavailable("reservation service is shutting down"))
}

async fn send_reply(transport: &dyn Transport, reply_to: ReplyAddress, outcome: ReservationOutcome) {
    let payload = match outcome.encode() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode reservation outcome: {}", e);
            match ReservationOutcome::failure(Failure::internal("failed to encode reply")).encode() {
                Ok(payload) => payload,
                Err(_) => return,
            }
        }
    };

    if let Err(e) = transport.reply(reply_to, payload).await {
        error!("Failed to send reservation reply: {}", e);
    }
}
