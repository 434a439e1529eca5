use async_trait::async_trait;
use seat_booking::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Delegates to an in-memory transport, counting replies and optionally
/// swallowing the first few of them.
struct Relay {
    inner: InMemoryTransport,
    replies: AtomicUsize,
    swallow: AtomicUsize,
}

impl Relay {
    fn new(inner: InMemoryTransport, swallow: usize) -> Self {
        Self {
            inner,
            replies: AtomicUsize::new(0),
            swallow: AtomicUsize::new(swallow),
        }
    }

    fn replies(&self) -> usize {
        self.replies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Relay {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.inner.publish(subject, payload).await
    }

    async fn request(&self, subject: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.inner.request(subject, payload, timeout).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.inner.subscribe(subject).await
    }

    async fn reply(&self, address: ReplyAddress, payload: Vec<u8>) -> Result<()> {
        self.replies.fetch_add(1, Ordering::SeqCst);
        let swallowed = self
            .swallow
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if swallowed {
            return Ok(());
        }
        self.inner.reply(address, payload).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        "relay"
    }
}

/// Store that misbehaves for one event and defers to memory for the rest.
struct FaultyStore {
    inner: InMemoryStore,
    event_id: EventId,
    fault: Fault,
}

#[derive(Clone, Copy)]
enum Fault {
    Panic,
    Hang,
}

#[async_trait]
impl BookingStore for FaultyStore {
    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>> {
        if event_id == self.event_id {
            match self.fault {
                Fault::Panic => panic!("storage driver crashed"),
                Fault::Hang => std::future::pending::<()>().await,
            }
        }
        self.inner.find_event(event_id).await
    }

    async fn find_booking(&self, event_id: EventId, user_id: &str) -> Result<Option<Booking>> {
        self.inner.find_booking(event_id, user_id).await
    }

    async fn count_bookings(&self, event_id: EventId) -> Result<u64> {
        self.inner.count_bookings(event_id).await
    }

    async fn insert_booking(&self, event_id: EventId, user_id: &str) -> Result<Booking> {
        self.inner.insert_booking(event_id, user_id).await
    }

    async fn upsert_event(&self, event: Event) -> Result<()> {
        self.inner.upsert_event(event).await
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn test_config(timeout_ms: u64) -> BookingConfig {
    BookingConfig {
        request_timeout_ms: timeout_ms,
        ..BookingConfig::default()
    }
}

fn responder_for(
    transport: Arc<dyn Transport>,
    store: Arc<dyn BookingStore>,
    config: &BookingConfig,
) -> ReservationResponder {
    let metrics = Metrics::new().unwrap();
    let engine = Arc::new(ReservationEngine::new(
        store,
        Arc::clone(&transport),
        config,
        metrics.clone(),
    ));
    ReservationResponder::new(transport, engine, config, metrics)
}

/// Subscribes before returning so no request can race the responder.
async fn spawn_responder(
    transport: Arc<dyn Transport>,
    store: Arc<dyn BookingStore>,
    config: &BookingConfig,
) -> broadcast::Sender<()> {
    let responder = responder_for(Arc::clone(&transport), store, config);
    let subscription = transport.subscribe(&config.reserve_subject).await.unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move { responder.serve(subscription, shutdown_rx).await });
    shutdown_tx
}

fn requester(transport: Arc<dyn Transport>, config: &BookingConfig) -> ReservationRequester {
    ReservationRequester::new(transport, config, Metrics::new().unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_oversell() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(1, "arena", 5)]));
    let _shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;
    let client = requester(transport.clone(), &config);

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let client = client.clone();
        tasks.spawn(async move {
            client
                .request_reservation(1, &format!("user-{}", i), Duration::from_secs(5))
                .await
        });
    }

    let mut booked = 0;
    let mut sold_out = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => booked += 1,
            Err(failure) => {
                assert_eq!(failure.code, ErrorCode::SoldOut);
                sold_out += 1;
            }
        }
    }

    assert_eq!(booked, 5);
    assert_eq!(sold_out, 45);
    assert_eq!(store.bookings_for(1).len(), 5);
    assert_eq!(store.count_bookings(1).await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_from_one_user_book_once() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(2, "club", 100)]));
    let _shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;
    let client = requester(transport.clone(), &config);

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let client = client.clone();
        tasks.spawn(async move {
            client
                .request_reservation(2, "x", Duration::from_secs(5))
                .await
        });
    }

    let mut booked = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(booking) => {
                assert_eq!(booking.user_id, "x");
                booked += 1;
            }
            Err(failure) => assert_eq!(failure.code, ErrorCode::AlreadyBooked),
        }
    }

    assert_eq!(booked, 1);
    assert_eq!(store.bookings_for(2).len(), 1);
}

#[tokio::test]
async fn last_seat_goes_to_exactly_one_of_two_users() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(1, "recital", 1)]));
    let _shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;
    let client = requester(transport.clone(), &config);

    let timeout = client.timeout();
    let (a, b) = tokio::join!(
        client.request_reservation(1, "a", timeout),
        client.request_reservation(1, "b", timeout),
    );

    let results = [a, b];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(loser.code, ErrorCode::SoldOut);
    assert_eq!(loser.kind(), FailureKind::Conflict);
}

#[tokio::test]
async fn second_booking_by_same_user_is_already_booked() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(2, "gallery", 10)]));
    let _shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;
    let client = requester(transport.clone(), &config);

    let first = client.request_reservation(2, "x", client.timeout()).await.unwrap();
    assert_eq!(first.event_id, 2);

    let second = client
        .request_reservation(2, "x", client.timeout())
        .await
        .unwrap_err();
    assert_eq!(second.code, ErrorCode::AlreadyBooked);
    assert_eq!(second.kind(), FailureKind::Conflict);
    assert_eq!(store.bookings_for(2).len(), 1);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::new());
    let _shutdown = spawn_responder(transport.clone(), store, &config).await;
    let client = requester(transport.clone(), &config);

    let failure = client
        .request_reservation(999, "u", client.timeout())
        .await
        .unwrap_err();

    assert_eq!(failure.code, ErrorCode::EventNotFound);
    assert_eq!(failure.kind(), FailureKind::NotFound);
}

#[tokio::test]
async fn malformed_payload_gets_a_malformed_reply() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(1, "arena", 5)]));
    let _shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;

    for payload in [
        b"not json at all".to_vec(),
        br#"{"event_id": "one", "user_id": "u"}"#.to_vec(),
        br#"{"event_id": 1, "user_id": ""}"#.to_vec(),
    ] {
        let reply = transport
            .request(&config.reserve_subject, payload, Duration::from_secs(1))
            .await
            .unwrap();
        let outcome = ReservationOutcome::decode(&reply).unwrap();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Malformed));
    }

    assert!(store.bookings_for(1).is_empty());
}

#[tokio::test]
async fn engine_panic_produces_exactly_one_internal_reply() {
    let config = test_config(2_000);
    let inner = InMemoryTransport::new();
    let relay = Arc::new(Relay::new(inner.clone(), 0));
    let store = Arc::new(FaultyStore {
        inner: InMemoryStore::with_events([Event::new(3, "cursed", 10)]),
        event_id: 3,
        fault: Fault::Panic,
    });
    let _shutdown = spawn_responder(relay.clone(), store, &config).await;
    let client = requester(Arc::new(inner), &config);

    let failure = client
        .request_reservation(3, "u", client.timeout())
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), FailureKind::Internal);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.replies(), 1);
}

#[tokio::test]
async fn slow_event_does_not_block_other_events() {
    let config = test_config(300);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(FaultyStore {
        inner: InMemoryStore::with_events([Event::new(1, "stuck", 10), Event::new(2, "fine", 10)]),
        event_id: 1,
        fault: Fault::Hang,
    });
    let _shutdown = spawn_responder(transport.clone(), store, &config).await;
    let client = requester(transport.clone(), &config);

    let timeout = client.timeout();
    let (stuck, fine) = tokio::join!(
        client.request_reservation(1, "a", timeout),
        client.request_reservation(2, "b", timeout),
    );

    assert_eq!(stuck.unwrap_err().kind(), FailureKind::Unavailable);
    assert_eq!(fine.unwrap().event_id, 2);
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn retry_after_lost_reply_reports_previous_booking() {
    let config = test_config(200);
    let inner = InMemoryTransport::new();
    // The first reply (the successful booking) never reaches the requester.
    let relay = Arc::new(Relay::new(inner.clone(), 1));
    let store = Arc::new(InMemoryStore::with_events([Event::new(4, "festival", 10)]));
    let _shutdown = spawn_responder(relay.clone(), store.clone(), &config).await;

    let client = requester(Arc::new(inner), &config).with_retry(RetryConfig::with_delays(
        3,
        Duration::from_millis(10),
        Duration::from_millis(50),
    ));

    let confirmation = client
        .request_reservation_with_retry(4, "dana", client.timeout())
        .await
        .unwrap();

    assert_eq!(
        confirmation,
        Confirmation::PreviouslyBooked {
            event_id: 4,
            user_id: "dana".to_string()
        }
    );
    assert_eq!(store.bookings_for(4).len(), 1);
    assert_eq!(relay.replies(), 2);
}

#[tokio::test]
async fn business_failures_are_not_retried() {
    let config = test_config(1_000);
    let inner = InMemoryTransport::new();
    let relay = Arc::new(Relay::new(inner.clone(), 0));
    let store = Arc::new(InMemoryStore::new());
    let _shutdown = spawn_responder(relay.clone(), store, &config).await;

    let client = requester(Arc::new(inner), &config).with_retry(RetryConfig::with_delays(
        3,
        Duration::from_millis(10),
        Duration::from_millis(50),
    ));

    let failure = client
        .request_reservation_with_retry(404, "u", client.timeout())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), FailureKind::NotFound);
    assert_eq!(relay.replies(), 1);
}

#[tokio::test]
async fn no_responder_is_unavailable() {
    let config = test_config(200);
    let client = requester(Arc::new(InMemoryTransport::new()), &config).with_retry(
        RetryConfig::with_delays(2, Duration::from_millis(10), Duration::from_millis(20)),
    );

    let single = client
        .request_reservation(1, "u", client.timeout())
        .await
        .unwrap_err();
    assert_eq!(single.kind(), FailureKind::Unavailable);

    let retried = client
        .request_reservation_with_retry(1, "u", client.timeout())
        .await
        .unwrap_err();
    assert_eq!(retried.kind(), FailureKind::Unavailable);
}

#[tokio::test]
async fn outcomes_are_published_as_domain_events() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(5, "lecture", 1)]));
    let _shutdown = spawn_responder(transport.clone(), store, &config).await;
    let client = requester(transport.clone(), &config);

    let booking = client.request_reservation(5, "first", client.timeout()).await.unwrap();
    client
        .request_reservation(5, "second", client.timeout())
        .await
        .unwrap_err();

    let created = transport.published(Subjects::BOOKING_CREATED);
    assert_eq!(created.len(), 1);
    let created: serde_json::Value = serde_json::from_slice(&created[0]).unwrap();
    assert_eq!(created["type"], "booking.created");
    assert_eq!(created["data"]["bookingId"], booking.id);

    let failed = transport.published(Subjects::BOOKING_FAILED);
    assert_eq!(failed.len(), 1);
    let failed: serde_json::Value = serde_json::from_slice(&failed[0]).unwrap();
    assert_eq!(failed["type"], "booking.failed");
}

#[tokio::test]
async fn responder_drains_before_stopping() {
    let config = test_config(5_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(6, "matinee", 3)]));
    let shutdown = spawn_responder(transport.clone(), store.clone(), &config).await;
    let client = requester(transport.clone(), &config);

    let mut tasks = JoinSet::new();
    for user in ["p", "q", "r"] {
        let client = client.clone();
        tasks.spawn(async move { client.request_reservation(6, user, Duration::from_secs(5)).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    shutdown.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let late = client
        .request_reservation(6, "s", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_eq!(late.kind(), FailureKind::Unavailable);
    assert_eq!(store.bookings_for(6).len(), 3);
}

fn spawn_request(
    requests: &mut JoinSet<Result<Vec<u8>>>,
    transport: Arc<InMemoryTransport>,
    subject: String,
    event_id: EventId,
    user_id: String,
) {
    requests.spawn(async move {
        let payload = ReservationRequest::new(event_id, &user_id).encode()?;
        transport.request(&subject, payload, Duration::from_secs(2)).await
    });
}

async fn wait_for_pending(transport: &InMemoryTransport, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while transport.pending_requests() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn buffered_requests_are_answered_when_shutdown_is_already_pending() {
    let config = test_config(2_000);
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryStore::with_events([Event::new(8, "gala", 100)]));
    let responder = responder_for(transport.clone(), store, &config);
    let subscription = transport.subscribe(&config.reserve_subject).await.unwrap();

    let mut requests = JoinSet::new();
    for i in 0..20 {
        spawn_request(&mut requests, transport.clone(), config.reserve_subject.clone(), 8, format!("guest-{}", i));
    }
    wait_for_pending(&transport, 20).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    shutdown_tx.send(()).unwrap();
    responder.serve(subscription, shutdown_rx).await.unwrap();

    while let Some(result) = requests.join_next().await {
        let reply = result.unwrap().expect("every buffered request gets a reply");
        let outcome = ReservationOutcome::decode(&reply).unwrap();
        assert!(
            outcome.is_success() || outcome.failure_kind() == Some(FailureKind::Unavailable),
            "unexpected outcome {:?}",
            outcome
        );
    }
}

#[tokio::test]
async fn shutdown_is_not_blocked_by_a_full_limiter() {
    let config = BookingConfig {
        max_in_flight: 1,
        ..test_config(5_000)
    };
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(FaultyStore {
        inner: InMemoryStore::with_events([Event::new(1, "stuck", 10)]),
        event_id: 1,
        fault: Fault::Hang,
    });
    let responder = responder_for(transport.clone(), store, &config)
        .with_drain_timeout(Duration::from_millis(100));
    let subscription = transport.subscribe(&config.reserve_subject).await.unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let serving = tokio::spawn(async move { responder.serve(subscription, shutdown_rx).await });

    let mut hung = JoinSet::new();
    // Takes the only slot and never finishes.
    spawn_request(&mut hung, transport.clone(), config.reserve_subject.clone(), 1, "a".to_string());
    wait_for_pending(&transport, 1).await;

    let mut waiting = JoinSet::new();
    spawn_request(&mut waiting, transport.clone(), config.reserve_subject.clone(), 1, "b".to_string());
    wait_for_pending(&transport, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .expect("responder stops while a reservation hangs")
        .unwrap()
        .unwrap();

    let reply = waiting.join_next().await.unwrap().unwrap().unwrap();
    let outcome = ReservationOutcome::decode(&reply).unwrap();
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Unavailable));

    hung.abort_all();
}
