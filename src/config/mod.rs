//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::client::targeting::{DEFAULT_INTERACTION_RADIUS, DEFAULT_INTERACTION_THRESHOLD};
use crate::game::spatial::{radius_covering, DEFAULT_CELL_SIZE, DEFAULT_PROXIMITY_RADIUS};
use crate::game::SyncSettings;
use crate::util::rate_limit::INPUT_RATE_LIMIT;

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS, `*` for any
    pub client_origin: String,
    /// Serve the browser client from here when set
    pub static_dir: Option<PathBuf>,

    /// Grid cell edge length (world units)
    pub cell_size: f32,
    /// Neighbourhood radius in cells
    pub proximity_radius: u32,
    /// Idle time after which a participant is swept
    pub inactivity_timeout: Duration,
    /// How often the sweep runs
    pub sweep_interval: Duration,
    /// Client targeting reach the neighbourhood has to cover
    pub interaction_radius: f32,

    /// Inbound messages per second per connection
    pub input_rate_limit: u32,
    /// Per-connection outbound queue depth
    pub outbound_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            static_dir: lookup("STATIC_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),

            cell_size: parse_or(&lookup, "CELL_SIZE", DEFAULT_CELL_SIZE)?,
            proximity_radius: parse_or(&lookup, "PROXIMITY_RADIUS", DEFAULT_PROXIMITY_RADIUS)?,
            inactivity_timeout: millis_or(&lookup, "INACTIVITY_TIMEOUT_MS", 60_000)?,
            sweep_interval: millis_or(&lookup, "SWEEP_INTERVAL_MS", 60_000)?,
            interaction_radius: parse_or(
                &lookup,
                "INTERACTION_RADIUS",
                DEFAULT_INTERACTION_RADIUS,
            )?,

            input_rate_limit: parse_or(&lookup, "INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
            outbound_buffer: parse_or(&lookup, "OUTBOUND_BUFFER", 256)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the sync layer cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "CELL_SIZE",
                reason: "must be a positive number",
            });
        }

        if !self.interaction_radius.is_finite() || self.interaction_radius <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "INTERACTION_RADIUS",
                reason: "must be a positive number",
            });
        }

        // The neighbourhood must reach at least as far as client targeting does
        let required = radius_covering(self.cell_size, self.interaction_radius);
        if self.proximity_radius < required {
            return Err(ConfigError::ProximityTooSmall {
                radius: self.proximity_radius,
                required,
            });
        }

        if self.inactivity_timeout.is_zero() || self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "INACTIVITY_TIMEOUT_MS/SWEEP_INTERVAL_MS",
                reason: "must be greater than zero",
            });
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "OUTBOUND_BUFFER",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Settings for the sync state machine
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            cell_size: self.cell_size,
            proximity_radius: self.proximity_radius,
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            static_dir: None,
            cell_size: DEFAULT_CELL_SIZE,
            proximity_radius: DEFAULT_PROXIMITY_RADIUS,
            inactivity_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            interaction_radius: DEFAULT_INTERACTION_RADIUS,
            input_rate_limit: INPUT_RATE_LIMIT,
            outbound_buffer: 256,
        }
    }
}

/// Simulated client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint of the server
    pub server_url: String,
    pub log_level: String,
    /// Minimum spacing between outgoing position updates
    pub update_interval: Duration,
    /// Fraction of the remaining distance covered per frame
    pub interpolation_damping: f32,
    /// Targeting reach (world units)
    pub interaction_radius: f32,
    /// Minimum facing alignment for a target
    pub interaction_threshold: f32,
    /// Reconnect attempts before giving up, 0 for unlimited
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Frames per second of the local loop
    pub tick_rate: u32,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            server_url: lookup("SERVER_URL").unwrap_or(defaults.server_url),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            update_interval: millis_or(&lookup, "UPDATE_INTERVAL_MS", 100)?,
            interpolation_damping: parse_or(
                &lookup,
                "INTERPOLATION_DAMPING",
                defaults.interpolation_damping,
            )?,
            interaction_radius: parse_or(&lookup, "INTERACTION_RADIUS", defaults.interaction_radius)?,
            interaction_threshold: parse_or(
                &lookup,
                "INTERACTION_THRESHOLD",
                defaults.interaction_threshold,
            )?,
            reconnect_attempts: parse_or(&lookup, "RECONNECT_ATTEMPTS", defaults.reconnect_attempts)?,
            reconnect_delay: millis_or(&lookup, "RECONNECT_DELAY_MS", 1_000)?,
            reconnect_max_delay: millis_or(&lookup, "RECONNECT_MAX_DELAY_MS", 5_000)?,
            tick_rate: parse_or(&lookup, "TICK_RATE", defaults.tick_rate)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interpolation_damping > 0.0 && self.interpolation_damping <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "INTERPOLATION_DAMPING",
                reason: "must be in (0, 1]",
            });
        }
        if !self.interaction_radius.is_finite() || self.interaction_radius <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "INTERACTION_RADIUS",
                reason: "must be a positive number",
            });
        }
        if !(-1.0..=1.0).contains(&self.interaction_threshold) {
            return Err(ConfigError::Invalid {
                name: "INTERACTION_THRESHOLD",
                reason: "must be in [-1, 1]",
            });
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                name: "TICK_RATE",
                reason: "must be greater than zero",
            });
        }
        if self.reconnect_delay > self.reconnect_max_delay {
            return Err(ConfigError::Invalid {
                name: "RECONNECT_DELAY_MS",
                reason: "must not exceed RECONNECT_MAX_DELAY_MS",
            });
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000/ws".to_string(),
            log_level: "info".to_string(),
            update_interval: Duration::from_millis(100),
            interpolation_damping: 0.3,
            interaction_radius: DEFAULT_INTERACTION_RADIUS,
            interaction_threshold: DEFAULT_INTERACTION_THRESHOLD,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1_000),
            reconnect_max_delay: Duration::from_millis(5_000),
            tick_rate: 60,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparsable { name, value: raw }),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, name, default_ms).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Could not parse {name}={value:?}")]
    Unparsable { name: &'static str, value: String },

    #[error("Invalid {name}: {reason}")]
    Invalid {
        name: &'static str,
        reason: &'static str,
    },

    #[error("PROXIMITY_RADIUS {radius} does not cover the interaction radius (needs at least {required})")]
    ProximityTooSmall { radius: u32, required: u32 },
}
