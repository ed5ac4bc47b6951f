//! Link characteristics of the simulated network.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trafficgen_core::validate::{validate_non_negative, validate_positive};
use trafficgen_core::{duration_from_millis_f64, SimTime, Validate, ValidationError, ValidationResult};

/// Configuration shared by every connection of a [`super::SimNetwork`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// One-way latency in milliseconds.
    pub latency_ms: f64,
    /// Bytes a connection may have in flight before `send` starts refusing data.
    pub tx_buffer_size: usize,
    /// Largest segment delivered to the receiver in one piece.
    pub segment_size: usize,
    /// Link rate in bits per second; `None` means segments serialise instantly.
    pub bandwidth_bps: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_ms: 5.0,
            tx_buffer_size: 131_072,
            segment_size: 1460,
            bandwidth_bps: None,
        }
    }
}

impl NetworkConfig {
    pub fn latency(&self) -> Duration {
        duration_from_millis_f64(self.latency_ms)
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_tx_buffer_size(mut self, tx_buffer_size: usize) -> Self {
        self.tx_buffer_size = tx_buffer_size;
        self
    }

    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth_bps: u64) -> Self {
        self.bandwidth_bps = Some(bandwidth_bps);
        self
    }

    fn serialisation_delay(&self, bytes: usize) -> Duration {
        match self.bandwidth_bps {
            Some(bps) => Duration::from_nanos((bytes as f64 * 8.0e9 / bps as f64).round() as u64),
            None => Duration::ZERO,
        }
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        validate_non_negative("latency_ms", self.latency_ms)?;
        validate_positive("tx_buffer_size", self.tx_buffer_size)?;
        validate_positive("segment_size", self.segment_size)?;
        if let Some(bps) = self.bandwidth_bps {
            validate_positive("bandwidth_bps", bps)?;
        }
        if !self.latency_ms.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "latency_ms".to_string(),
                reason: "must be finite".to_string(),
            });
        }
        Ok(())
    }
}

/// Delivery schedule of one direction of a connection.
///
/// Segments leave the sender one after another, so arrival times never decrease
/// and the byte stream stays in order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Link {
    free_at: SimTime,
    last_arrival: SimTime,
}

impl Link {
    /// Arrival time of a `bytes`-long segment handed to the link at `now`.
    pub(crate) fn transmit(&mut self, config: &NetworkConfig, now: SimTime, bytes: usize) -> SimTime {
        let departure = self.free_at.max(now) + config.serialisation_delay(bytes);
        self.free_at = departure;
        self.last_arrival = departure + config.latency();
        self.last_arrival
    }

    /// Earliest time a control message sent at `now` may arrive without
    /// overtaking data already in flight.
    pub(crate) fn after_in_flight(&self, config: &NetworkConfig, now: SimTime) -> SimTime {
        self.last_arrival.max(now + config.latency())
    }
}
