//! Window attribution and online-stream framing
//!
//! For each slot, every record on the live list is examined against the
//! window bounds `m0..mf` using the kernel's measured arrival `t0` and
//! finish `tf`:
//!
//! - **written** to the online stream iff `tf > m0 && t0 < mf`: the
//!   kernel overlapped the window. A started-but-unfinished kernel has
//!   `tf` at the far-future sentinel and qualifies, which is correct: it
//!   is live in the window.
//! - **retained** on the list iff `tf > mf || t0 == tf`: still running
//!   past the window, or not started at all (both stamps at the
//!   sentinel). Kernels that truly finished inside the window drop off.
//!
//! The stream is tagged so a consumer needs no prior knowledge of how
//! many kernels ran per slot: a header, then per slot zero or more
//! `(1, snapshot)` pairs closed by a `0`.

use std::io::Write;

use anyhow::{Context, Result};
use bincode::Options;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use tessera_shared::protocol::records::{
    wire_options, KernelSnapshot, WindowHeader, WireTimestamp, TAG_END_OF_SLOT, TAG_KERNEL,
};
use tessera_shared::types::monitor::{CpuUsage, MonitorWindow};
use tessera_shared::utils::time::join_nanos;

use crate::slots::SlotLiveLists;

/// Attribute the live kernels to `window` and frame the result into
/// `out`. Consumes each slot's live list under its lock and re-enqueues
/// the records still live for a future window.
pub fn write_online<W: Write>(
    out: &mut W,
    cpu: CpuUsage,
    window: &MonitorWindow,
    live: &SlotLiveLists,
) -> Result<()> {
    let header = WindowHeader {
        cpu_user: cpu.user,
        cpu_kernel: cpu.kernel,
        cpu_idle: cpu.idle,
        initial: WireTimestamp::from(window.initial_time),
        start: WireTimestamp::from(window.measured_start),
        finish: WireTimestamp::from(window.measured_finish),
        slot_count: live.num_slots() as i32,
    };
    wire_options()
        .serialize_into(&mut *out, &header)
        .context("framing window header")?;

    for slot in 0..live.num_slots() {
        let drained = live.drain_slot(slot);
        let mut keep = Vec::with_capacity(drained.len());

        for record in drained {
            let t0 = record.measured_arrival();
            let tf = record.measured_finish();

            if tf > window.measured_start && t0 < window.measured_finish {
                out.write_i32::<LittleEndian>(TAG_KERNEL)
                    .context("framing kernel tag")?;
                let snapshot = KernelSnapshot {
                    label: record.label.0 as i32,
                    arrival: WireTimestamp::from(t0),
                    finish: WireTimestamp::from(tf),
                };
                wire_options()
                    .serialize_into(&mut *out, &snapshot)
                    .context("framing kernel snapshot")?;
            }

            if tf > window.measured_finish || t0 == tf {
                keep.push(record);
            }
        }

        out.write_i32::<LittleEndian>(TAG_END_OF_SLOT)
            .context("framing end-of-slot tag")?;
        live.requeue(slot, keep);
    }

    Ok(())
}

/// Parsed form of one window's online record.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineWindow {
    pub cpu: CpuUsage,
    pub window: MonitorWindow,
    pub per_slot: Vec<Vec<OnlineKernel>>,
}

/// Parsed form of one kernel snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineKernel {
    pub label: i32,
    pub arrival: i64,
    pub finish: i64,
}

/// Parse one window's online record from the valid prefix of a segment.
pub fn parse_online(mut bytes: &[u8]) -> Result<OnlineWindow> {
    let header: WindowHeader = wire_options()
        .deserialize_from(&mut bytes)
        .context("parsing window header")?;

    let mut per_slot = Vec::with_capacity(header.slot_count as usize);
    for slot in 0..header.slot_count {
        let mut kernels = Vec::new();
        loop {
            let tag = bytes
                .read_i32::<LittleEndian>()
                .with_context(|| format!("reading tag in slot {slot}"))?;
            if tag == TAG_END_OF_SLOT {
                break;
            }
            if tag != TAG_KERNEL {
                anyhow::bail!("slot {slot}: unknown online tag {tag}");
            }
            let snapshot: KernelSnapshot = wire_options()
                .deserialize_from(&mut bytes)
                .with_context(|| format!("parsing kernel snapshot in slot {slot}"))?;
            kernels.push(OnlineKernel {
                label: snapshot.label,
                arrival: join_nanos(snapshot.arrival.sec, snapshot.arrival.nsec),
                finish: join_nanos(snapshot.finish.sec, snapshot.finish.nsec),
            });
        }
        per_slot.push(kernels);
    }

    Ok(OnlineWindow {
        cpu: CpuUsage {
            user: header.cpu_user,
            kernel: header.cpu_kernel,
            idle: header.cpu_idle,
        },
        window: MonitorWindow {
            initial_time: join_nanos(header.initial.sec, header.initial.nsec),
            measured_start: join_nanos(header.start.sec, header.start.nsec),
            measured_finish: join_nanos(header.finish.sec, header.finish.nsec),
        },
        per_slot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_shared::types::kernel::{KernelLabel, KernelRecord};
    use tessera_shared::utils::time::SENTINEL_NANOS;

    fn live_record(id: u32, label: u32, mask: u32, t0: i64, tf: i64) -> Arc<KernelRecord> {
        let record = Arc::new(KernelRecord::new(id, KernelLabel(label), 1, mask.count_ones(), 0, 0));
        record.set_slot_mask(mask);
        if t0 != SENTINEL_NANOS {
            record.mark_arrival(t0);
        }
        if tf != SENTINEL_NANOS {
            record.mark_finish(tf);
        }
        record
    }

    fn window(m0: i64, mf: i64) -> MonitorWindow {
        MonitorWindow {
            initial_time: 0,
            measured_start: m0,
            measured_finish: mf,
        }
    }

    #[test]
    fn test_overlapping_kernel_is_written_and_dropped() {
        let live = SlotLiveLists::new(2);
        // Finished inside the window: written once, not retained.
        let record = live_record(0, 4, 0b01, 100, 200);
        live.register(&record);

        let mut out = Vec::new();
        write_online(&mut out, CpuUsage::default(), &window(50, 500), &live).unwrap();

        let parsed = parse_online(&out).unwrap();
        assert_eq!(parsed.per_slot.len(), 2);
        assert_eq!(parsed.per_slot[0].len(), 1);
        assert_eq!(
            parsed.per_slot[0][0],
            OnlineKernel {
                label: 4,
                arrival: 100,
                finish: 200,
            }
        );
        assert!(parsed.per_slot[1].is_empty());
        assert_eq!(live.len(0), 0);
    }

    #[test]
    fn test_unstarted_kernel_is_retained_not_written() {
        let live = SlotLiveLists::new(1);
        let record = live_record(0, 1, 0b1, SENTINEL_NANOS, SENTINEL_NANOS);
        live.register(&record);

        let mut out = Vec::new();
        write_online(&mut out, CpuUsage::default(), &window(50, 500), &live).unwrap();

        let parsed = parse_online(&out).unwrap();
        assert!(parsed.per_slot[0].is_empty());
        assert_eq!(live.len(0), 1);
    }

    #[test]
    fn test_running_kernel_is_written_and_retained() {
        let live = SlotLiveLists::new(1);
        // Started before the window, finish still at the sentinel.
        let record = live_record(0, 2, 0b1, 100, SENTINEL_NANOS);
        live.register(&record);

        let mut out = Vec::new();
        write_online(&mut out, CpuUsage::default(), &window(200, 700), &live).unwrap();

        let parsed = parse_online(&out).unwrap();
        assert_eq!(parsed.per_slot[0].len(), 1);
        assert_eq!(parsed.per_slot[0][0].finish, SENTINEL_NANOS);
        assert_eq!(live.len(0), 1);
    }

    #[test]
    fn test_finished_before_window_not_written() {
        let live = SlotLiveLists::new(1);
        let record = live_record(0, 3, 0b1, 10, 40);
        live.register(&record);

        let mut out = Vec::new();
        write_online(&mut out, CpuUsage::default(), &window(50, 500), &live).unwrap();

        let parsed = parse_online(&out).unwrap();
        assert!(parsed.per_slot[0].is_empty());
        assert_eq!(live.len(0), 0);
    }

    #[test]
    fn test_wide_kernel_appears_on_every_slot() {
        let live = SlotLiveLists::new(4);
        let record = live_record(0, 5, 0b1111, 100, 200);
        live.register(&record);

        let mut out = Vec::new();
        write_online(&mut out, CpuUsage::default(), &window(50, 500), &live).unwrap();

        let parsed = parse_online(&out).unwrap();
        for slot in &parsed.per_slot {
            assert_eq!(slot.len(), 1);
            assert_eq!(slot[0].label, 5);
        }
    }

    #[test]
    fn test_cpu_triple_round_trips() {
        let live = SlotLiveLists::new(1);
        let cpu = CpuUsage {
            user: 12.5,
            kernel: 25.0,
            idle: 62.5,
        };
        let mut out = Vec::new();
        write_online(&mut out, cpu, &window(1, 2), &live).unwrap();
        assert_eq!(parse_online(&out).unwrap().cpu, cpu);
    }
}
