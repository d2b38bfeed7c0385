use std::time::Duration;

use thiserror::Error;

use crate::{channel::reliable_ordered::SEND_WINDOW_LEN, protocol::packet::DATA_MAX_SIZE};

/// Largest message whose fragments always fit into half the packet id space
/// together with the send window.
pub const MESSAGE_SIZE_LIMIT: usize =
    (u16::MAX as usize / 2 - SEND_WINDOW_LEN as usize) * DATA_MAX_SIZE;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// A peer nothing was received from for this long is dropped.
    pub timeout: Duration,
    /// Longest silence towards a peer before a keep-alive goes out.
    pub keepalive_interval: Duration,

    /// Retransmission timeout used until the first round trip is measured.
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    pub ratio_rto_to_one_rtt: f64,

    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_millis(100),
            initial_rto: Duration::from_millis(250),
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_secs(5),
            ratio_rto_to_one_rtt: 1.5,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero { field: "timeout" });
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "keepalive_interval",
            });
        }
        if self.keepalive_interval >= self.timeout {
            return Err(ConfigError::KeepAliveInterval {
                keepalive_interval: self.keepalive_interval,
                timeout: self.timeout,
            });
        }
        if self.min_rto.is_zero() {
            return Err(ConfigError::Zero { field: "min_rto" });
        }
        if self.min_rto > self.max_rto {
            return Err(ConfigError::RtoBounds {
                min: self.min_rto,
                max: self.max_rto,
            });
        }
        if !(self.ratio_rto_to_one_rtt >= 1.0) {
            return Err(ConfigError::RtoRatio(self.ratio_rto_to_one_rtt));
        }
        if self.max_message_size > MESSAGE_SIZE_LIMIT {
            return Err(ConfigError::MessageSize {
                size: self.max_message_size,
                max: MESSAGE_SIZE_LIMIT,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must not be zero")]
    Zero { field: &'static str },
    #[error("keepalive interval {keepalive_interval:?} must be shorter than the timeout {timeout:?}")]
    KeepAliveInterval {
        keepalive_interval: Duration,
        timeout: Duration,
    },
    #[error("min_rto {min:?} exceeds max_rto {max:?}")]
    RtoBounds { min: Duration, max: Duration },
    #[error("ratio_rto_to_one_rtt must be at least 1, got {0}")]
    RtoRatio(f64),
    #[error("max_message_size {size} exceeds {max}")]
    MessageSize { size: usize, max: usize },
}
