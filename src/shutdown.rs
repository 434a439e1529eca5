use crate::{BookingError, BookingStore, Result, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;
use tracing::{info, warn, error};

/// Graceful shutdown coordinator
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Mutex<Vec<Box<dyn ShutdownComponent + Send + Sync>>>>,
    completed: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

/// Trait for components that need graceful shutdown
#[async_trait::async_trait]
pub trait ShutdownComponent {
    async fn shutdown(&self) -> Result<()>;
    fn name(&self) -> &str;
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            components: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicBool::new(false)),
            shutdown_timeout,
        }
    }

    /// Register a component for graceful shutdown
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent + Send + Sync>) {
        let mut components = self.components.lock().await;
        info!("Registering component '{}' for graceful shutdown", component.name());
        components.push(component);
    }

    /// Get a shutdown signal receiver
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every subscriber to stop, without tearing components down yet.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown signal sent with no listeners");
        }
    }

    /// Signal subscribers, then shut every registered component down once.
    pub async fn shutdown(&self) -> Result<()> {
        if self.completed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());

        let components = self.components.lock().await;

        // Components are released in reverse registration order.
        let shutdown_future = async {
            let mut failures = 0;
            for component in components.iter().rev() {
                let component_name = component.name().to_string();
                info!("Shutting down component '{}'", component_name);
                match component.shutdown().await {
                    Ok(()) => info!("Component '{}' shutdown successfully", component_name),
                    Err(e) => {
                        error!("Component '{}' shutdown failed: {}", component_name, e);
                        failures += 1;
                    }
                }
            }
            failures
        };

        match tokio::time::timeout(self.shutdown_timeout, shutdown_future).await {
            Ok(0) => {
                info!("All components shutdown successfully");
                Ok(())
            }
            Ok(failures) => Err(BookingError::InvalidArgument(format!(
                "{} component(s) failed to shut down",
                failures
            ))),
            Err(_) => {
                error!("Shutdown timeout exceeded");
                Err(BookingError::InvalidArgument("Shutdown timeout exceeded".to_string()))
            }
        }
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }
}

/// Closes the broker connection
pub struct TransportShutdown {
    transport: Arc<dyn Transport>,
}

impl TransportShutdown {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for TransportShutdown {
    async fn shutdown(&self) -> Result<()> {
        info!("Closing transport '{}'...", self.transport.name());
        self.transport.close().await
    }

    fn name(&self) -> &str {
        "transport"
    }
}

/// Flushes the booking store
pub struct StoreShutdown {
    store: Arc<dyn BookingStore>,
}

impl StoreShutdown {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for StoreShutdown {
    async fn shutdown(&self) -> Result<()> {
        info!("Flushing booking store...");
        self.store.flush().await
    }

    fn name(&self) -> &str {
        "booking-store"
    }
}

/// Signal handler for graceful shutdown
pub fn setup_signal_handlers(coordinator: ShutdownCoordinator) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                        }
                    }
                }
                _ => {
                    error!("Failed to install unix signal handlers, falling back to Ctrl+C");
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        coordinator.trigger();
    });
}

/// Run a service until it finishes or a shutdown signal arrives. Registered
/// components are shut down on every exit path, including service errors.
pub async fn run_with_graceful_shutdown<F, Fut>(
    service_name: &str,
    service_future: F,
    shutdown_coordinator: ShutdownCoordinator,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    info!("Starting service '{}'", service_name);

    setup_signal_handlers(shutdown_coordinator.clone());

    let service_result = service_future().await;
    match &service_result {
        Ok(()) => info!("Service '{}' completed", service_name),
        Err(e) => error!("Service '{}' failed: {}", service_name, e),
    }

    if let Err(e) = shutdown_coordinator.shutdown().await {
        error!("Failed to shutdown service '{}': {}", service_name, e);
        return service_result.and(Err(e));
    }

    service_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryTransport;

    #[tokio::test]
    async fn shutdown_closes_transport_even_after_service_error() {
        let transport = InMemoryTransport::new();
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator
            .register_component(Box::new(TransportShutdown::new(Arc::new(transport.clone()))))
            .await;

        let result = run_with_graceful_shutdown(
            "failing-service",
            || async { Err(BookingError::Store("disk on fire".to_string())) },
            coordinator.clone(),
        )
        .await;

        assert!(matches!(result, Err(BookingError::Store(_))));
        assert!(transport.subscribe("anything").await.is_err());
    }

    #[tokio::test]
    async fn trigger_reaches_subscribers() {
        let coordinator = ShutdownCoordinator::default();
        let mut rx = coordinator.subscribe();

        coordinator.trigger();

        assert!(rx.recv().await.is_ok());
    }
}
