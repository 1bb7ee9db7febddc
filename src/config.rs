//! Tunables for timing and temperature bounds, gathered in one place so
//! tests can shrink every timeout without touching the rest of the crate.

use std::time::Duration;

/// Default protocol port used by the Escea iQ Controller.
pub const DEFAULT_PORT: u16 = 3300;

/// Default broadcast address used to probe for controllers.
pub const DEFAULT_BROADCAST_ADDR: &str = "255.255.255.255";

#[derive(Debug, Clone)]
pub struct Config {
    /// How long to wait for a reply to a single wire exchange.
    pub request_timeout: Duration,
    /// Poll cadence while a controller is READY.
    pub refresh_interval: Duration,
    /// Emit `controller_update` at least this often even without a change.
    pub notify_refresh_interval: Duration,
    /// Poll cadence while a controller is NON_RESPONSIVE.
    pub retry_interval: Duration,
    /// Time since the last valid reply after which NON_RESPONSIVE becomes DISCONNECTED.
    pub retry_timeout: Duration,
    /// Poll cadence while a controller is DISCONNECTED.
    pub disconnected_interval: Duration,
    /// How long a controller stays BUSY after a power toggle.
    pub on_off_busy_wait_time: Duration,
    /// Scan-loop sleep when no controller is disconnected.
    pub discovery_sleep: Duration,
    /// Scan-loop sleep when at least one controller is disconnected.
    pub discovery_rescan: Duration,
    /// Inclusive lower bound for `set_desired_temp`.
    pub min_set_temp: u8,
    /// Inclusive upper bound for `set_desired_temp`.
    pub max_set_temp: u8,
    /// UDP port the protocol runs on.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(30),
            notify_refresh_interval: Duration::from_secs(300),
            retry_interval: Duration::from_secs(10),
            retry_timeout: Duration::from_secs(60),
            disconnected_interval: Duration::from_secs(300),
            on_off_busy_wait_time: Duration::from_secs(66),
            discovery_sleep: Duration::from_secs(60),
            discovery_rescan: Duration::from_secs(5),
            min_set_temp: 16,
            max_set_temp: 30,
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    pub fn with_request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn with_refresh_interval(mut self, d: Duration) -> Self {
        self.refresh_interval = d;
        self
    }

    pub fn with_retry_timeout(mut self, d: Duration) -> Self {
        self.retry_timeout = d;
        self
    }

    pub fn with_retry_interval(mut self, d: Duration) -> Self {
        self.retry_interval = d;
        self
    }

    pub fn with_on_off_busy_wait_time(mut self, d: Duration) -> Self {
        self.on_off_busy_wait_time = d;
        self
    }

    pub fn with_temp_range(mut self, min: u8, max: u8) -> Self {
        self.min_set_temp = min;
        self.max_set_temp = max;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}
