use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Push,
    Poll,
    Failover,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(TransportMode::Push),
            "poll" => Ok(TransportMode::Poll),
            "failover" => Ok(TransportMode::Failover),
            other => Err(format!("unknown transport {other}, expected push/poll/failover")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}, expected compact/json")),
        }
    }
}

/// Knobs for the polling path and its backoff.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            timeout: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub restaurant: GeoPoint,
    pub delivery_radius_km: f64,
    pub staleness_window: Duration,
    pub poll: PollPolicy,
    pub assumed_speed_kmh: f64,
    pub transport: TransportMode,
    pub subscriber_buffer: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            restaurant: GeoPoint::new(28.9845, 77.7064),
            delivery_radius_km: 10.0,
            staleness_window: Duration::from_secs(30),
            poll: PollPolicy::default(),
            assumed_speed_kmh: 20.0,
            transport: TransportMode::Failover,
            subscriber_buffer: 16,
        }
    }
}

impl TrackingConfig {
    /// Rejects settings that would spin the staleness timers or the poller.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.restaurant.is_valid() {
            return Err(AppError::Internal("restaurant coordinates out of range".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(AppError::Internal("SUBSCRIBER_BUFFER must be > 0".to_string()));
        }
        if self.staleness_window.is_zero() {
            return Err(AppError::Internal("STALENESS_WINDOW_SECS must be > 0".to_string()));
        }
        if self.poll.interval.is_zero() {
            return Err(AppError::Internal("POLL_INTERVAL_SECS must be > 0".to_string()));
        }
        if self.poll.max_interval < self.poll.interval {
            return Err(AppError::Internal(
                "POLL_MAX_INTERVAL_SECS must be >= POLL_INTERVAL_SECS".to_string(),
            ));
        }
        if self.poll.timeout.is_zero() {
            return Err(AppError::Internal("POLL_TIMEOUT_MS must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub tracking: TrackingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            restaurant: GeoPoint::new(
                parse_or_default("RESTAURANT_LATITUDE", defaults.restaurant.lat)?,
                parse_or_default("RESTAURANT_LONGITUDE", defaults.restaurant.lng)?,
            ),
            delivery_radius_km: parse_or_default("DELIVERY_RADIUS_KM", defaults.delivery_radius_km)?,
            staleness_window: Duration::from_secs(parse_or_default("STALENESS_WINDOW_SECS", 30)?),
            poll: PollPolicy {
                interval: Duration::from_secs(parse_or_default("POLL_INTERVAL_SECS", 5)?),
                max_interval: Duration::from_secs(parse_or_default("POLL_MAX_INTERVAL_SECS", 30)?),
                timeout: Duration::from_millis(parse_or_default("POLL_TIMEOUT_MS", 2_000)?),
            },
            assumed_speed_kmh: parse_or_default("ASSUMED_SPEED_KMH", defaults.assumed_speed_kmh)?,
            transport: parse_or_default("TRACKING_TRANSPORT", defaults.transport)?,
            subscriber_buffer: parse_or_default("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
        };

        tracking.validate()?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            tracking,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
