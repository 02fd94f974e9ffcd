//! Session configuration.
//!
//! All fields have defaults, so a configuration file only needs to name the
//! values it changes. Durations are expressed in milliseconds when
//! serialized:
//!
//! ```
//! use wsmux::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{ "stream_window": 4096, "open_timeout": 500 }"#).unwrap();
//! assert_eq!(config.stream_window, 4096);
//! assert_eq!(config.open_timeout.as_millis(), 500);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::protocol::HEADER_SIZE;

/// Default per-stream receive window in bytes.
pub const DEFAULT_STREAM_WINDOW: u32 = 1024;

/// Default time `Session::open` waits for the remote acknowledgment.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of remote opens queued for `Session::accept`.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 128;

/// Default cadence of the removable-stream sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default message capacity of the in-memory transport.
pub const DEFAULT_TRANSPORT_CHANNEL_CAPACITY: usize = 1024;

/// Default largest message accepted by the length-prefixed transport (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Configuration shared by both ends of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inbound buffer capacity of each stream, advertised as initial credit.
    pub stream_window: u32,
    /// Time to wait for the peer to acknowledge an open request.
    #[serde(with = "duration_ms")]
    pub open_timeout: Duration,
    /// Remote opens queued before further opens are refused.
    pub accept_backlog: usize,
    /// Interval between sweeps of dead, drained streams.
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
    /// Message capacity of in-memory transports built from this config.
    pub transport_channel_capacity: usize,
    /// Largest message accepted by the length-prefixed transport.
    pub max_message_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_window: DEFAULT_STREAM_WINDOW,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            transport_channel_capacity: DEFAULT_TRANSPORT_CHANNEL_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the per-stream receive window.
    pub fn with_stream_window(mut self, window: u32) -> Self {
        self.stream_window = window;
        self
    }

    /// Set the open timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the accept backlog.
    pub fn with_accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the in-memory transport channel capacity.
    pub fn with_transport_channel_capacity(mut self, capacity: usize) -> Self {
        self.transport_channel_capacity = capacity;
        self
    }

    /// Set the maximum message size of the length-prefixed transport.
    pub fn with_max_message_size(mut self, size: u32) -> Self {
        self.max_message_size = size;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.stream_window == 0 {
            return Err(MuxError::Config("stream_window must be non-zero".to_string()));
        }
        if self.open_timeout.is_zero() {
            return Err(MuxError::Config("open_timeout must be non-zero".to_string()));
        }
        if self.accept_backlog == 0 {
            return Err(MuxError::Config("accept_backlog must be non-zero".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(MuxError::Config("sweep_interval must be non-zero".to_string()));
        }
        if self.transport_channel_capacity == 0 {
            return Err(MuxError::Config(
                "transport_channel_capacity must be non-zero".to_string(),
            ));
        }
        // A message must at least hold a full DATA frame for one window.
        if (self.max_message_size as u64) < self.stream_window as u64 + HEADER_SIZE as u64 {
            return Err(MuxError::Config(format!(
                "max_message_size {} is smaller than stream_window {}",
                self.max_message_size, self.stream_window
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
