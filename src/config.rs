//! Session configuration.

use std::time::Duration;

use crate::error::Error;

/// Tunables for a session.
///
/// The defaults are production values; `validate()` runs before a session
/// starts so a bad configuration never reaches the engine tasks.
#[derive(Debug, Clone)]
pub struct Config {
    /// Protocol version byte stamped on every outgoing frame. Incoming
    /// frames carrying any other value are a fatal protocol error.
    pub version: u8,
    /// Largest `PSH` payload per frame, in bytes. Bounded by the 16-bit
    /// length field.
    pub max_frame_size: usize,
    /// Session-wide budget for unread bytes buffered across all streams.
    /// Once the budget is spent, no further frames are read from the
    /// transport until a consumer drains a stream.
    pub max_receive_buffer: usize,
    /// Skip the keepalive task entirely.
    pub keep_alive_disabled: bool,
    /// Cadence of outgoing `NOP` liveness frames.
    pub keep_alive_interval: Duration,
    /// How long the peer may stay silent before the session is presumed
    /// dead. A session parked on a spent receive budget is exempt.
    pub keep_alive_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: 1,
            max_frame_size: 32 * 1024,
            max_receive_buffer: 4 * 1024 * 1024,
            keep_alive_disabled: false,
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Check the configuration for internally inconsistent or out-of-range
    /// values.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.keep_alive_disabled {
            if self.keep_alive_interval.is_zero() {
                return Err(Error::InvalidConfig("keep-alive interval must be positive"));
            }
            if self.keep_alive_timeout < self.keep_alive_interval {
                return Err(Error::InvalidConfig(
                    "keep-alive timeout must be at least the interval",
                ));
            }
        }
        if self.max_frame_size == 0 {
            return Err(Error::InvalidConfig("max frame size must be positive"));
        }
        if self.max_frame_size > u16::MAX as usize {
            return Err(Error::InvalidConfig("max frame size exceeds the length field"));
        }
        if self.max_receive_buffer == 0 {
            return Err(Error::InvalidConfig("max receive buffer must be positive"));
        }
        if self.max_receive_buffer > i32::MAX as usize {
            return Err(Error::InvalidConfig("max receive buffer exceeds the token range"));
        }
        Ok(())
    }
}
