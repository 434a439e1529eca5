use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Request to '{subject}' timed out after {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u128 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("User {user_id} already booked for event {event_id}")]
    DuplicateBooking { event_id: i64, user_id: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BookingError {
    /// Transport-level faults: the request may or may not have reached the
    /// responder, so a fresh attempt is allowed.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            BookingError::Timeout { .. } | BookingError::Transport(_) | BookingError::Kafka(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
