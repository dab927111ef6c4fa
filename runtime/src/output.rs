//! Output log and final report
//!
//! Every dispatched record is installed here; at shutdown the log is
//! persisted as a packed array of little-endian records, one per admitted
//! kernel, in dispatch order.
//!
//! Record layout (108 bytes):
//!
//! ```text
//! i32 id | i32 label | i32 executions | i32 cu | u32 slot_mask |
//! i64 intended_arrival_ms |
//! (i64 sec, i64 nsec) commanded | measured_arrival | measured_finish |
//! measured_pre_exec | measured_post_exec
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::info;

use tessera_shared::types::kernel::KernelRecord;
use tessera_shared::utils::time::{join_nanos, split_nanos};

/// Serialized size of one report record.
pub const RECORD_BYTES: usize = 108;

/// Ordered log of every dispatched kernel record.
pub struct OutputLog {
    records: Mutex<Vec<Arc<KernelRecord>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Install a record at dispatch time.
    pub fn push(&self, record: Arc<KernelRecord>) {
        self.records.lock().unwrap().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the log, in dispatch order.
    pub fn snapshot(&self) -> Vec<Arc<KernelRecord>> {
        self.records.lock().unwrap().clone()
    }

    /// Persist the log as the packed binary report.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let records = self.records.lock().unwrap();
        for record in records.iter() {
            write_record(&mut out, record)?;
        }
        out.flush().context("flushing the kernel report")?;

        info!(
            "report: {} records ({} bytes) -> {}",
            records.len(),
            records.len() * RECORD_BYTES,
            path.display()
        );
        Ok(())
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}

fn write_record(out: &mut impl Write, record: &KernelRecord) -> Result<()> {
    out.write_i32::<LittleEndian>(record.id as i32)?;
    out.write_i32::<LittleEndian>(record.label.0 as i32)?;
    out.write_i32::<LittleEndian>(record.executions as i32)?;
    out.write_i32::<LittleEndian>(record.cu as i32)?;
    out.write_u32::<LittleEndian>(record.slot_mask())?;
    out.write_i64::<LittleEndian>(record.intended_arrival_ms)?;
    for nanos in [
        record.commanded_arrival,
        record.measured_arrival(),
        record.measured_finish(),
        record.measured_pre_exec(),
        record.measured_post_exec(),
    ] {
        let (sec, nsec) = split_nanos(nanos);
        out.write_i64::<LittleEndian>(sec)?;
        out.write_i64::<LittleEndian>(nsec)?;
    }
    Ok(())
}

/// Parsed form of one report record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRecord {
    pub id: u32,
    pub label: u32,
    pub executions: u32,
    pub cu: u32,
    pub slot_mask: u32,
    pub intended_arrival_ms: i64,
    pub commanded_arrival: i64,
    pub measured_arrival: i64,
    pub measured_finish: i64,
    pub measured_pre_exec: i64,
    pub measured_post_exec: i64,
}

/// Read a report file back into parsed records.
pub fn read_report(path: &Path) -> Result<Vec<ReportRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let len = file.metadata()?.len() as usize;
    if len % RECORD_BYTES != 0 {
        anyhow::bail!(
            "{}: length {len} is not a whole number of {RECORD_BYTES}-byte records",
            path.display()
        );
    }

    let mut input = BufReader::new(file);
    let mut records = Vec::with_capacity(len / RECORD_BYTES);
    for _ in 0..len / RECORD_BYTES {
        records.push(read_record(&mut input)?);
    }
    Ok(records)
}

fn read_record(input: &mut impl Read) -> Result<ReportRecord> {
    let id = input.read_i32::<LittleEndian>()? as u32;
    let label = input.read_i32::<LittleEndian>()? as u32;
    let executions = input.read_i32::<LittleEndian>()? as u32;
    let cu = input.read_i32::<LittleEndian>()? as u32;
    let slot_mask = input.read_u32::<LittleEndian>()?;
    let intended_arrival_ms = input.read_i64::<LittleEndian>()?;

    let mut stamps = [0i64; 5];
    for stamp in &mut stamps {
        let sec = input.read_i64::<LittleEndian>()?;
        let nsec = input.read_i64::<LittleEndian>()?;
        *stamp = join_nanos(sec, nsec);
    }

    Ok(ReportRecord {
        id,
        label,
        executions,
        cu,
        slot_mask,
        intended_arrival_ms,
        commanded_arrival: stamps[0],
        measured_arrival: stamps[1],
        measured_finish: stamps[2],
        measured_pre_exec: stamps[3],
        measured_post_exec: stamps[4],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::types::kernel::KernelLabel;
    use tessera_shared::utils::time::SENTINEL_NANOS;

    #[test]
    fn test_report_round_trip() {
        let log = OutputLog::new();

        let finished = Arc::new(KernelRecord::new(0, KernelLabel(3), 2, 4, 10, 5_000));
        finished.mark_arrival(1_000_000);
        finished.mark_finish(9_000_000);
        finished.mark_pre_exec(900_000);
        finished.mark_post_exec(9_100_000);
        log.push(finished);

        // A record that never ran keeps its sentinels and empty mask.
        log.push(Arc::new(KernelRecord::new(1, KernelLabel(7), 1, 1, 2, 6_000)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernels_info.bin");
        log.write_to(&path).unwrap();

        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            2 * RECORD_BYTES
        );

        let records = read_report(&path).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].id, 0);
        assert_eq!(records[0].label, 3);
        assert_eq!(records[0].cu, 4);
        assert_eq!(records[0].measured_arrival, 1_000_000);
        assert_eq!(records[0].measured_finish, 9_000_000);

        assert_eq!(records[1].measured_arrival, SENTINEL_NANOS);
        assert_eq!(records[1].measured_finish, SENTINEL_NANOS);
        assert_eq!(records[1].slot_mask, 0);
    }

    #[test]
    fn test_truncated_report_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernels_info.bin");
        std::fs::write(&path, vec![0u8; RECORD_BYTES + 1]).unwrap();
        assert!(read_report(&path).is_err());
    }
}
