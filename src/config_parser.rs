use crate::{Result, BookingError, ServiceConfig};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Parse Java properties file into ServiceConfig
pub fn parse_properties_file<P: AsRef<Path>>(path: P, application_id: &str) -> Result<ServiceConfig> {
    let properties = read_properties(&path)?;
    let mut config = ServiceConfig::new(application_id);
    apply_properties(&mut config, properties)?;
    Ok(config)
}

/// Parse an additional properties file and merge it over `config`
pub fn merge_properties_file<P: AsRef<Path>>(mut config: ServiceConfig, path: P) -> Result<ServiceConfig> {
    let properties = read_properties(&path)?;
    apply_properties(&mut config, properties)?;
    Ok(config)
}

/// Overlay `BOOKING_*` environment variables, e.g. `BOOKING_BOOTSTRAP_SERVERS`
/// or `BOOKING_REQUEST_TIMEOUT_MS`.
pub fn apply_env_overrides(config: ServiceConfig) -> Result<ServiceConfig> {
    apply_overrides(config, config::Environment::with_prefix("BOOKING"))
}

pub fn apply_overrides(mut config: ServiceConfig, source: config::Environment) -> Result<ServiceConfig> {
    let settings = config::Config::builder().add_source(source).build()?;

    if let Ok(servers) = settings.get_string("bootstrap_servers") {
        config.kafka.bootstrap_servers = servers;
    }
    if let Ok(state_dir) = settings.get_string("state_dir") {
        config.state_dir = state_dir;
    }
    if let Ok(timeout_ms) = settings.get_int("request_timeout_ms") {
        config.booking.request_timeout_ms = in_range("request_timeout_ms", timeout_ms)?;
    }
    if let Ok(max_in_flight) = settings.get_int("max_in_flight") {
        config.booking.max_in_flight = in_range("max_in_flight", max_in_flight)?;
    }
    if let Ok(attempts) = settings.get_int("retry_max_attempts") {
        config.booking.retry_max_attempts = in_range("retry_max_attempts", attempts)?;
    }

    Ok(config)
}

fn read_properties<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let file = File::open(&path).map_err(|e| {
        BookingError::InvalidArgument(format!("Failed to open config file {:?}: {}", path.as_ref(), e))
    })?;

    let reader = BufReader::new(file);
    java_properties::read(reader)
        .map_err(|e| BookingError::InvalidArgument(format!("Failed to parse properties: {}", e)))
}

fn apply_properties(config: &mut ServiceConfig, properties: HashMap<String, String>) -> Result<()> {
    for (key, value) in properties {
        match key.as_str() {
            "bootstrap.servers" => config.kafka.bootstrap_servers = value,
            "security.protocol" => config.kafka.security_protocol = Some(value),
            "sasl.mechanism" => config.kafka.sasl_mechanism = Some(value),
            "sasl.username" => config.kafka.sasl_username = Some(value),
            "sasl.password" => config.kafka.sasl_password = Some(value),
            "ssl.ca.location" => config.kafka.ssl_ca_location = Some(value),
            "state.dir" => config.state_dir = value,
            "booking.subject.reserve" => config.booking.reserve_subject = value,
            "booking.subject.created" => config.booking.created_subject = value,
            "booking.subject.failed" => config.booking.failed_subject = value,
            "booking.reply.topic" => config.booking.reply_topic = value,
            "booking.request.timeout.ms" => {
                config.booking.request_timeout_ms = parse_number(&key, &value)?;
            }
            "booking.max.in.flight" => {
                config.booking.max_in_flight = parse_number(&key, &value)?;
            }
            "booking.retry.max.attempts" => {
                config.booking.retry_max_attempts = parse_number(&key, &value)?;
            }
            "booking.retry.initial.delay.ms" => {
                config.booking.retry_initial_delay_ms = parse_number(&key, &value)?;
            }
            "booking.retry.max.delay.ms" => {
                config.booking.retry_max_delay_ms = parse_number(&key, &value)?;
            }
            _ => {
                config.kafka.additional_properties.insert(key, value);
            }
        }
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        BookingError::InvalidArgument(format!("Invalid number for {}: {}", key, value))
    })
}

fn in_range<T: TryFrom<i64>>(key: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        BookingError::InvalidArgument(format!("{} is out of range: {}", key, value))
    })
}
