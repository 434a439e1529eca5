use seat_booking::{
    BookingStore, Event, KafkaTransport, Metrics, ReservationEngine, ReservationResponder, Result,
    RocksDbStore, ServiceConfig, ShutdownCoordinator, StoreShutdown, Transport, TransportShutdown,
    run_with_graceful_shutdown,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    responder: ReservationResponder,
    metrics: Metrics,
    coordinator: ShutdownCoordinator,
}

impl BookingService {
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(KafkaTransport::connect(&config)?);
        let store: Arc<dyn BookingStore> = Arc::new(RocksDbStore::open_in(&config.state_dir, "bookings")?);
        let metrics = Metrics::new()?;

        let engine = Arc::new(ReservationEngine::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            &config.booking,
            metrics.clone(),
        ));
        let responder = ReservationResponder::new(
            Arc::clone(&transport),
            engine,
            &config.booking,
            metrics.clone(),
        );

        // Released in reverse: the transport closes before the store flushes.
        let coordinator = ShutdownCoordinator::default();
        coordinator
            .register_component(Box::new(StoreShutdown::new(Arc::clone(&store))))
            .await;
        coordinator
            .register_component(Box::new(TransportShutdown::new(transport)))
            .await;

        Ok(Self {
            store,
            responder,
            metrics,
            coordinator,
        })
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Load events from a JSON array of `{id, name, total_seats}`.
    pub async fn seed_events(&self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path)?;
        let events: Vec<Event> = serde_json::from_str(&contents)?;
        let count = events.len();

        for event in events {
            info!("Seeding event {} ({} seats)", event.id, event.total_seats);
            self.store.upsert_event(event).await?;
        }

        Ok(count)
    }

    pub async fn run(&self) -> Result<()> {
        let shutdown = self.coordinator.subscribe();
        run_with_graceful_shutdown(
            "booking-service",
            || self.responder.run(shutdown),
            self.coordinator.clone(),
        )
        .await
    }
}
