//! Kernel statistics records.
//!
//! The kernel module reports one record per sample as `num_fields_kernel`
//! native-endian `u32` values. The first [`StatField::COUNT`] positions have
//! fixed meanings; any further configured fields are carried along unnamed.

use crate::error::ChannelError;
use std::time::Duration;

/// Named positions inside a statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatField {
    /// Kernel timestamp in microseconds.
    NowUs,
    /// Congestion window, in segments.
    Cwnd,
    /// Smoothed round-trip time, in microseconds.
    RttUs,
    /// Round-trip time deviation, in microseconds.
    RttDevUs,
    /// Minimum observed round-trip time, in microseconds.
    MinRttUs,
    /// Maximum segment size, in bytes.
    Mss,
    /// Segments delivered since the previous sample.
    Delivered,
    /// Segments marked lost since the previous sample.
    Lost,
    /// Segments currently in flight.
    InFlight,
    /// Retransmitted segments since the previous sample.
    Retrans,
}

impl StatField {
    /// Number of named fields.
    pub const COUNT: usize = 10;

    /// All named fields in wire order.
    pub const ALL: [StatField; Self::COUNT] = [
        Self::NowUs,
        Self::Cwnd,
        Self::RttUs,
        Self::RttDevUs,
        Self::MinRttUs,
        Self::Mss,
        Self::Delivered,
        Self::Lost,
        Self::InFlight,
        Self::Retrans,
    ];

    /// Position of this field inside a record.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NowUs => "now_us",
            Self::Cwnd => "cwnd",
            Self::RttUs => "rtt_us",
            Self::RttDevUs => "rtt_dev_us",
            Self::MinRttUs => "min_rtt_us",
            Self::Mss => "mss",
            Self::Delivered => "delivered",
            Self::Lost => "lost",
            Self::InFlight => "in_flight",
            Self::Retrans => "retrans",
        }
    }
}

/// One kernel-reported sample. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRecord {
    timestamp: Duration,
    values: Vec<f64>,
}

impl StatRecord {
    /// Creates a record received `timestamp` after the channel was opened.
    #[must_use]
    pub fn new(timestamp: Duration, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }

    /// Receive time relative to channel open.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// All field values in wire order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value of a named field, or 0 if the record is too short.
    #[must_use]
    pub fn get(&self, field: StatField) -> f64 {
        self.values.get(field.index()).copied().unwrap_or(0.0)
    }
}

/// Decodes a statistics payload of `num_fields` native-endian `u32` values.
///
/// Trailing bytes past the last field (netlink alignment padding) are ignored.
///
/// # Errors
///
/// Returns `ChannelError::decode` if the payload is too short.
pub fn decode_payload(payload: &[u8], num_fields: usize) -> Result<Vec<f64>, ChannelError> {
    let needed = num_fields * 4;
    if payload.len() < needed {
        return Err(ChannelError::decode(format!(
            "payload has {} bytes, expected at least {} for {} fields",
            payload.len(),
            needed,
            num_fields
        )));
    }

    Ok(payload[..needed]
        .chunks_exact(4)
        .map(|chunk| f64::from(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
        .collect())
}
