//! Per-connection tuning.

use crate::segment::{BASE_HEADER_OCTETS, MAX_SEGMENT_LEN};
use std::time::Duration;
use thiserror::Error as ThisError;

/// The STCP maximum segment size: the largest payload put in one segment
pub const STCP_MSS: usize = 536;
/// The default size of the congestion, sender and receive windows
pub const DEFAULT_WINDOW: u16 = 3072;

/// Tuning for one connection. Every connection gets its own copy, so tests and
/// multiple connections in one process never share mutable knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Initial congestion, sender and receive window, in bytes
    pub window_size: u16,
    /// The most payload bytes put in a single segment
    pub max_payload_len: usize,
    /// The largest datagram the substrate carries, header included
    pub max_segment_len: usize,
    /// How long each handshake step may wait for the peer
    pub handshake_timeout: Duration,
    /// How long the control loop waits before re-evaluating
    pub event_timeout: Duration,
    /// How the initial sequence number is picked
    pub initial_sequence: IssPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW,
            max_payload_len: STCP_MSS,
            max_segment_len: MAX_SEGMENT_LEN,
            handshake_timeout: Duration::from_secs(1),
            event_timeout: Duration::from_secs(1),
            initial_sequence: IssPolicy::Random,
        }
    }
}

impl Config {
    /// Set the window size
    pub fn window_size(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    /// Set the maximum payload per segment
    pub fn max_payload_len(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the steady-state wait deadline
    pub fn event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Use the given initial sequence number instead of a random one
    pub fn fixed_iss(mut self, iss: u32) -> Self {
        self.initial_sequence = IssPolicy::Fixed(iss);
        self
    }

    /// Checks that the knobs describe a connection that can move data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            Err(ConfigError::ZeroWindow)?
        }
        if self.max_payload_len == 0 {
            Err(ConfigError::ZeroPayload)?
        }
        let max = self
            .max_segment_len
            .min(MAX_SEGMENT_LEN)
            .saturating_sub(BASE_HEADER_OCTETS);
        if self.max_payload_len > max {
            Err(ConfigError::PayloadExceedsSegment {
                payload: self.max_payload_len,
                max,
            })?
        }
        Ok(())
    }

    /// Picks an initial sequence number according to the policy
    pub fn choose_iss(&self) -> u32 {
        match self.initial_sequence {
            IssPolicy::Fixed(iss) => iss,
            IssPolicy::Random => rand::random(),
        }
    }
}

/// How a connection picks its initial sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssPolicy {
    Fixed(u32),
    Random,
}

/// A configuration that cannot be used to open a connection
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    #[error("The window size must be non-zero")]
    ZeroWindow,
    #[error("The maximum payload length must be non-zero")]
    ZeroPayload,
    #[error("A {payload} byte payload does not fit in a segment (at most {max})")]
    PayloadExceedsSegment { payload: usize, max: usize },
}
