use crate::Subjects;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
    pub additional_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            additional_properties: HashMap::new(),
        }
    }
}

/// Reservation protocol settings shared by the gateway and the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    pub reserve_subject: String,
    pub created_subject: String,
    pub failed_subject: String,
    pub reply_topic: String,
    pub request_timeout_ms: u64,
    pub max_in_flight: usize,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            reserve_subject: Subjects::BOOKING_RESERVE.to_string(),
            created_subject: Subjects::BOOKING_CREATED.to_string(),
            failed_subject: Subjects::BOOKING_FAILED.to_string(),
            reply_topic: Subjects::BOOKING_REPLIES.to_string(),
            request_timeout_ms: 30_000,
            max_in_flight: 64,
            retry_max_attempts: 1,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl BookingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_enabled(&self) -> bool {
        self.retry_max_attempts > 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub application_id: String,
    pub state_dir: String,
    pub kafka: KafkaConfig,
    pub booking: BookingConfig,
}

impl ServiceConfig {
    pub fn new(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            state_dir: "/tmp/seat-booking".to_string(),
            kafka: KafkaConfig::default(),
            booking: BookingConfig::default(),
        }
    }

    pub fn to_producer_config(&self) -> rdkafka::ClientConfig {
        let mut config = self.base_kafka_config();
        config.set("client.id", &self.application_id);
        config
    }

    pub fn to_consumer_config(&self, group_id: &str, offset_reset: &str) -> rdkafka::ClientConfig {
        let mut config = self.base_kafka_config();
        config.set("group.id", group_id);
        config.set("auto.offset.reset", offset_reset);
        config.set("enable.auto.commit", "false");
        config
    }

    fn base_kafka_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config.set("bootstrap.servers", &self.kafka.bootstrap_servers);

        if let Some(security_protocol) = &self.kafka.security_protocol {
            config.set("security.protocol", security_protocol);
        }

        if let Some(sasl_mechanism) = &self.kafka.sasl_mechanism {
            config.set("sasl.mechanism", sasl_mechanism);
        }

        if let Some(sasl_username) = &self.kafka.sasl_username {
            config.set("sasl.username", sasl_username);
        }

        if let Some(sasl_password) = &self.kafka.sasl_password {
            config.set("sasl.password", sasl_password);
        }

        if let Some(ssl_ca_location) = &self.kafka.ssl_ca_location {
            config.set("ssl.ca.location", ssl_ca_location);
        }

        for (key, value) in &self.kafka.additional_properties {
            config.set(key, value);
        }

        config
    }
}
