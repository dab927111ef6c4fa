//! Shared-memory ring buffers
//!
//! Three parallel ring-mapped regions (power, traces, online), each a
//! fixed-size backing file mapped shared so the model service can read it
//! from another process. With one measurement per training the ring is the
//! classic two-segment ping-pong; with M > 1 it is an M-segment round
//! robin holding a whole training phase while the service drains it.
//!
//! The last word of every segment is the count of valid bytes. It is
//! stored after the bulk with a release fence, so a reader that observes
//! the footer also observes the data it covers.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use tracing::debug;

/// Bytes reserved at the end of each segment for the valid-byte count.
pub const FOOTER_BYTES: usize = 4;

const POWER_FILE_NAME: &str = "power_file";
const TRACES_FILE_NAME: &str = "traces_file";
const ONLINE_FILE_NAME: &str = "online_file";

struct MappedRing {
    map: MmapMut,
    segment_bytes: usize,
}

impl MappedRing {
    fn create(path: &Path, segment_bytes: usize, segments: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("opening ring file {}", path.display()))?;
        file.set_len((segment_bytes * segments) as u64)
            .with_context(|| format!("sizing ring file {}", path.display()))?;

        // SAFETY: the mapping is private to this process as a writer; the
        // reader side maps the same file read-only and synchronizes on the
        // footer word.
        let map = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("mapping ring file {}", path.display()))?;

        Ok(Self { map, segment_bytes })
    }

    fn segment(&self, index: usize) -> &[u8] {
        let start = index * self.segment_bytes;
        &self.map[start..start + self.segment_bytes]
    }

    fn segment_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.segment_bytes;
        &mut self.map[start..start + self.segment_bytes]
    }
}

/// The three ring-mapped regions plus the shared write cursor.
pub struct RingBuffers {
    power: MappedRing,
    traces: MappedRing,
    online: MappedRing,
    segments: usize,
    cursor: usize,
}

impl RingBuffers {
    /// Create (or re-create) the three ring files under `dir`.
    ///
    /// `measurements_per_training == 1` yields the two-segment ping-pong;
    /// larger values yield one segment per measurement of the phase.
    pub fn create(
        dir: &Path,
        measurements_per_training: u32,
        power_segment_bytes: usize,
        traces_segment_bytes: usize,
        online_segment_bytes: usize,
    ) -> Result<Self> {
        let segments = if measurements_per_training == 1 {
            2
        } else {
            measurements_per_training as usize
        };

        let power = MappedRing::create(&dir.join(POWER_FILE_NAME), power_segment_bytes, segments)?;
        let traces =
            MappedRing::create(&dir.join(TRACES_FILE_NAME), traces_segment_bytes, segments)?;
        let online =
            MappedRing::create(&dir.join(ONLINE_FILE_NAME), online_segment_bytes, segments)?;

        debug!(
            "ring buffers mapped under {}: {segments} segments",
            dir.display()
        );
        Ok(Self {
            power,
            traces,
            online,
            segments,
            cursor: 0,
        })
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Writers over the current segment of each region.
    pub fn writers(&mut self) -> WindowWriters<'_> {
        let cursor = self.cursor;
        WindowWriters {
            power: SegmentWriter::new(self.power.segment_mut(cursor)),
            traces: SegmentWriter::new(self.traces.segment_mut(cursor)),
            online: SegmentWriter::new(self.online.segment_mut(cursor)),
        }
    }

    /// Advance the write cursor, wrapping at the segment count.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.segments;
    }

    /// Read-only views for consumers and tests.
    pub fn power_segment(&self, index: usize) -> &[u8] {
        self.power.segment(index)
    }

    pub fn traces_segment(&self, index: usize) -> &[u8] {
        self.traces.segment(index)
    }

    pub fn online_segment(&self, index: usize) -> &[u8] {
        self.online.segment(index)
    }
}

/// Valid-byte count stored in a segment's trailing word.
pub fn read_footer(segment: &[u8]) -> i32 {
    LittleEndian::read_i32(&segment[segment.len() - FOOTER_BYTES..])
}

/// The per-window writer triple.
pub struct WindowWriters<'a> {
    pub power: SegmentWriter<'a>,
    pub traces: SegmentWriter<'a>,
    pub online: SegmentWriter<'a>,
}

/// Bounded cursor over one segment. `finish` seals the segment by storing
/// the number of bytes written into the trailing word, after a release
/// fence over the bulk.
pub struct SegmentWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> SegmentWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Usable capacity (the trailing word is reserved for the footer).
    pub fn capacity(&self) -> usize {
        self.buf.len() - FOOTER_BYTES
    }

    /// Seal the segment: bulk first, footer last.
    pub fn finish(self) {
        fence(Ordering::Release);
        let len = self.buf.len();
        LittleEndian::write_i32(&mut self.buf[len - FOOTER_BYTES..], self.written as i32);
    }
}

impl io::Write for SegmentWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.written + data.len() > self.capacity() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!(
                    "ring segment overflow: {} + {} bytes over a {}-byte segment",
                    self.written,
                    data.len(),
                    self.capacity()
                ),
            ));
        }
        self.buf[self.written..self.written + data.len()].copy_from_slice(data);
        self.written += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn small_ring(dir: &Path, m: u32) -> RingBuffers {
        RingBuffers::create(dir, m, 64, 64, 64).unwrap()
    }

    #[test]
    fn test_ping_pong_depth() {
        let dir = tempfile::tempdir().unwrap();
        let ring = small_ring(dir.path(), 1);
        assert_eq!(ring.segments(), 2);
    }

    #[test]
    fn test_round_robin_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = small_ring(dir.path(), 3);
        assert_eq!(ring.segments(), 3);

        let seen: Vec<usize> = (0..6)
            .map(|_| {
                let c = ring.cursor();
                ring.advance();
                c
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_footer_written_last_word() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = small_ring(dir.path(), 3);

        let mut writers = ring.writers();
        writers.online.write_all(b"abcdef").unwrap();
        assert_eq!(writers.online.written(), 6);
        writers.online.finish();

        let segment = ring.online_segment(0);
        assert_eq!(&segment[..6], b"abcdef");
        assert_eq!(read_footer(segment), 6);
    }

    #[test]
    fn test_segments_do_not_alias() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = small_ring(dir.path(), 3);

        for fill in [b'x', b'y', b'z'] {
            let mut writers = ring.writers();
            writers.online.write_all(&[fill; 8]).unwrap();
            writers.online.finish();
            ring.advance();
        }

        assert_eq!(&ring.online_segment(0)[..8], &[b'x'; 8]);
        assert_eq!(&ring.online_segment(1)[..8], &[b'y'; 8]);
        assert_eq!(&ring.online_segment(2)[..8], &[b'z'; 8]);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut ring = small_ring(dir.path(), 2);
        let mut writers = ring.writers();
        assert!(writers.online.write_all(&[0u8; 61]).is_err());
    }
}
