//! Fixed-width wire records
//!
//! Everything crossing the model-service sockets or the online ring
//! segment is a little-endian fixed-width record, written and read whole.
//! Fixed-size structs go through bincode's fixint encoding; stream tags
//! and the variable-length per-label tail of the feature record are
//! emitted with byteorder. No self-describing formats on the wire.

use anyhow::{Context, Result};
use bincode::Options;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::utils::time::split_nanos;

/// MSB of a training-stream command selects train (set) vs test (clear).
pub const TRAIN_FLAG: u32 = 1 << 31;

/// End-of-session marker on the training stream.
pub const END_OF_SESSION: u32 = 0;

/// Marker sent between workloads so the service resets its ingest state.
pub const NEW_WORKLOAD: i32 = -1;

/// Online-stream tag: a kernel snapshot follows.
pub const TAG_KERNEL: i32 = 1;

/// Online-stream tag: end of the current slot's kernel list.
pub const TAG_END_OF_SLOT: i32 = 0;

/// Serialized size of [`WindowHeader`].
pub const WINDOW_HEADER_BYTES: usize = 64;

/// Serialized size of [`KernelSnapshot`].
pub const KERNEL_SNAPSHOT_BYTES: usize = 36;

/// Serialized size of [`Prediction`] and [`Metrics`].
pub const PREDICTION_BYTES: usize = 12;
pub const METRICS_BYTES: usize = 12;

/// bincode options producing packed little-endian fixed-width records.
pub fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// `(sec, nsec)` pair as stored in on-disk and on-wire records.
///
/// Unset timestamps carry `(i64::MAX, i64::MAX)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl From<i64> for WireTimestamp {
    fn from(nanos: i64) -> Self {
        let (sec, nsec) = split_nanos(nanos);
        Self { sec, nsec }
    }
}

/// Header opening one window's online record: the CPU usage triple, the
/// window bounds and the number of per-slot kernel lists that follow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowHeader {
    pub cpu_user: f32,
    pub cpu_kernel: f32,
    pub cpu_idle: f32,
    pub initial: WireTimestamp,
    pub start: WireTimestamp,
    pub finish: WireTimestamp,
    pub slot_count: i32,
}

/// One kernel's attribution entry inside a slot's tagged list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub label: i32,
    pub arrival: WireTimestamp,
    pub finish: WireTimestamp,
}

/// Prediction reply: processing-system power, programmable-logic power and
/// execution time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ps_power: f32,
    pub pl_power: f32,
    pub time: f32,
}

/// Train/test reply: model error metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub ps_power_error: f32,
    pub pl_power_error: f32,
    pub time_error: f32,
}

/// Prediction-request features: the CPU usage triple plus one live-count
/// byte per kernel label.
///
/// The per-label tail length is a deployment parameter, so this record is
/// encoded by hand rather than through bincode (which would prefix the
/// vector with its length).
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub user: f32,
    pub kernel: f32,
    pub idle: f32,
    pub per_label: Vec<u8>,
}

impl Features {
    /// Encoded size for a given label count.
    pub fn encoded_len(num_labels: usize) -> usize {
        12 + num_labels
    }

    /// Encode as `f32 user | f32 kernel | f32 idle | u8 per_label[...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::encoded_len(self.per_label.len())];
        LittleEndian::write_f32(&mut out[0..4], self.user);
        LittleEndian::write_f32(&mut out[4..8], self.kernel);
        LittleEndian::write_f32(&mut out[8..12], self.idle);
        out[12..].copy_from_slice(&self.per_label);
        out
    }
}

impl Prediction {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        wire_options()
            .deserialize(bytes)
            .context("malformed prediction record")
    }
}

impl Metrics {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        wire_options()
            .deserialize(bytes)
            .context("malformed metrics record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::SENTINEL_NANOS;

    #[test]
    fn test_window_header_layout() {
        let header = WindowHeader {
            cpu_user: 1.0,
            cpu_kernel: 2.0,
            cpu_idle: 97.0,
            initial: WireTimestamp { sec: 10, nsec: 20 },
            start: WireTimestamp { sec: 30, nsec: 40 },
            finish: WireTimestamp { sec: 50, nsec: 60 },
            slot_count: 8,
        };

        let bytes = wire_options().serialize(&header).unwrap();
        assert_eq!(bytes.len(), WINDOW_HEADER_BYTES);

        // Expected layout (fixint, little-endian):
        // 0-11:  three f32 CPU fields
        // 12-59: six i64 window timestamps
        // 60-63: i32 slot count
        assert_eq!(bytes[0..4], 1.0f32.to_le_bytes());
        assert_eq!(bytes[12..20], 10i64.to_le_bytes());
        assert_eq!(bytes[52..60], 60i64.to_le_bytes());
        assert_eq!(bytes[60..64], 8i32.to_le_bytes());
    }

    #[test]
    fn test_kernel_snapshot_layout() {
        let snap = KernelSnapshot {
            label: 5,
            arrival: WireTimestamp { sec: 1, nsec: 2 },
            finish: WireTimestamp { sec: 3, nsec: 4 },
        };

        let bytes = wire_options().serialize(&snap).unwrap();
        assert_eq!(bytes.len(), KERNEL_SNAPSHOT_BYTES);
        assert_eq!(bytes[0..4], 5i32.to_le_bytes());
        assert_eq!(bytes[4..12], 1i64.to_le_bytes());
        assert_eq!(bytes[28..36], 4i64.to_le_bytes());
    }

    #[test]
    fn test_prediction_round_trip() {
        let p = Prediction {
            ps_power: 1.5,
            pl_power: 2.5,
            time: 0.125,
        };
        let bytes = wire_options().serialize(&p).unwrap();
        assert_eq!(bytes.len(), PREDICTION_BYTES);
        assert_eq!(Prediction::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn test_metrics_round_trip() {
        let m = Metrics {
            ps_power_error: 0.1,
            pl_power_error: 0.2,
            time_error: 0.3,
        };
        let bytes = wire_options().serialize(&m).unwrap();
        assert_eq!(bytes.len(), METRICS_BYTES);
        assert_eq!(Metrics::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn test_features_encoding() {
        let f = Features {
            user: 58.0,
            kernel: 33.0,
            idle: 9.0,
            per_label: vec![2, 0, 0, 1, 0, 2, 0, 1, 0, 1, 0],
        };
        let bytes = f.encode();
        assert_eq!(bytes.len(), Features::encoded_len(11));
        assert_eq!(bytes[0..4], 58.0f32.to_le_bytes());
        assert_eq!(&bytes[12..], &f.per_label[..]);
    }

    #[test]
    fn test_sentinel_timestamp_on_wire() {
        let ts = WireTimestamp::from(SENTINEL_NANOS);
        assert_eq!(ts.sec, i64::MAX);
        assert_eq!(ts.nsec, i64::MAX);
    }

    #[test]
    fn test_train_flag_commands() {
        let n = 200u32;
        assert_eq!(n | TRAIN_FLAG, 0x8000_00C8);
        assert_eq!((n | TRAIN_FLAG) & !TRAIN_FLAG, n);
    }
}
