use prometheus::{
    Counter, CounterVec, Histogram, Gauge, Registry, Opts, HistogramOpts,
    register_counter_with_registry, register_counter_vec_with_registry,
    register_histogram_with_registry, register_gauge_with_registry, Encoder, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use crate::{ReservationOutcome, Result};

/// Metrics collector for the booking system
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Transport metrics
    pub messages_published: Counter,
    pub messages_received: Counter,
    pub publish_errors: Counter,
    pub request_duration: Histogram,
    pub request_timeouts: Counter,
    pub request_retries: Counter,

    // Reservation metrics
    pub reservations_attempted: Counter,
    pub reservations_successful: Counter,
    pub reservations_failed: CounterVec,
    pub reservation_duration: Histogram,
    pub reservations_in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let messages_published = register_counter_with_registry!(
            Opts::new("broker_messages_published_total", "Total number of messages published to the broker"),
            registry
        )?;

        let messages_received = register_counter_with_registry!(
            Opts::new("broker_messages_received_total", "Total number of inbound broker messages"),
            registry
        )?;

        let publish_errors = register_counter_with_registry!(
            Opts::new("broker_publish_errors_total", "Total number of failed publishes"),
            registry
        )?;

        let request_duration = register_histogram_with_registry!(
            HistogramOpts::new("broker_request_duration_seconds", "Round trip time of request/reply calls")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            registry
        )?;

        let request_timeouts = register_counter_with_registry!(
            Opts::new("broker_request_timeouts_total", "Total number of request/reply timeouts"),
            registry
        )?;

        let request_retries = register_counter_with_registry!(
            Opts::new("broker_request_retries_total", "Total number of retried reservation requests"),
            registry
        )?;

        let reservations_attempted = register_counter_with_registry!(
            Opts::new("reservations_attempted_total", "Total number of reservation attempts"),
            registry
        )?;

        let reservations_successful = register_counter_with_registry!(
            Opts::new("reservations_successful_total", "Total number of successful reservations"),
            registry
        )?;

        let reservations_failed = register_counter_vec_with_registry!(
            Opts::new("reservations_failed_total", "Total number of failed reservations"),
            &["error_code"],
            registry
        )?;

        let reservation_duration = register_histogram_with_registry!(
            HistogramOpts::new("reservation_duration_seconds", "Time spent deciding a reservation")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            registry
        )?;

        let reservations_in_flight = register_gauge_with_registry!(
            Opts::new("reservations_in_flight", "Reservations currently being processed"),
            registry
        )?;

        Ok(Self {
            registry,
            messages_published,
            messages_received,
            publish_errors,
            request_duration,
            request_timeouts,
            request_retries,
            reservations_attempted,
            reservations_successful,
            reservations_failed,
            reservation_duration,
            reservations_in_flight,
        })
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_publish(&self, success: bool) {
        self.messages_published.inc();
        if !success {
            self.publish_errors.inc();
        }
    }

    pub fn record_received(&self) {
        self.messages_received.inc();
    }

    pub fn record_request(&self, duration: Duration, timed_out: bool) {
        self.request_duration.observe(duration.as_secs_f64());
        if timed_out {
            self.request_timeouts.inc();
        }
    }

    pub fn record_retry(&self) {
        self.request_retries.inc();
    }

    pub fn record_reservation(&self, outcome: &ReservationOutcome, duration: Duration) {
        self.reservations_attempted.inc();
        self.reservation_duration.observe(duration.as_secs_f64());
        match &outcome.result {
            Ok(_) => self.reservations_successful.inc(),
            Err(failure) => self
                .reservations_failed
                .with_label_values(&[failure.code.as_str()])
                .inc(),
        }
    }

    pub fn reservation_started(&self) {
        self.reservations_in_flight.inc();
    }

    pub fn reservation_finished(&self) {
        self.reservations_in_flight.dec();
    }
}
