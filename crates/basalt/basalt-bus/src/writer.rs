//! Multi-producer writer side of the bus.
//!
//! # Protocol
//!
//! 1. **Allocate**: `fetch_add` the slot stride onto the shared tail. The old
//!    tail is this writer's slot; no other writer can ever receive it.
//! 2. **Encode**: plain stores of the metadata word and the payload. No reader
//!    looks at the slot body until its status word says `Commit`.
//! 3. **Publish**: CAS the status word `NotSet -> Commit`. The CAS is the
//!    release fence for the plain stores of step 2.
//!
//! Allocation order is serialized by the fetch-add, publish order is not: a
//! writer holding a later slot may commit before an earlier one finishes.
//! Readers still deliver in slot order.

use crate::error::BusError;
use crate::layout::{DATA_OFFSET, RecordLayout, StatusFlag, TAIL_OFFSET};
use crate::message::BusMessage;
use basalt_config::BusConfig;
use basalt_mmap::MemoryRegion;
use std::path::Path;
use tracing::{debug, warn};

/// A slot that has been allocated and filled but not yet published.
///
/// Readers roll back slots that stay unpublished past their timeout, so a
/// pending record should be committed promptly.
#[must_use = "an uncommitted slot stalls readers until they roll it back"]
#[derive(Debug)]
pub struct PendingCommit {
    slot: usize,
}

impl PendingCommit {
    /// File offset of the slot.
    pub fn offset(&self) -> usize {
        self.slot
    }
}

/// The writer side of a bus file.
///
/// Any number of writers, in any number of processes, may share one file.
/// A single `BusWriter` is also `Sync` and can be shared between threads.
#[derive(Debug)]
pub struct BusWriter {
    region: MemoryRegion,
    layout: RecordLayout,
}

impl BusWriter {
    /// Opens the bus at `path`, creating the file if needed.
    ///
    /// An existing file keeps its records and tail; new records are appended.
    pub fn open<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        record_size: usize,
    ) -> Result<Self, BusError> {
        let layout = RecordLayout::new(capacity, record_size)?;
        let region = MemoryRegion::open(path.as_ref(), capacity).map_err(|source| BusError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(Self::init(region, layout))
    }

    /// Creates the bus at `path`, discarding any previous file contents.
    ///
    /// Must not be used while other endpoints have the file mapped.
    pub fn create<P: AsRef<Path>>(
        path: P,
        capacity: usize,
        record_size: usize,
    ) -> Result<Self, BusError> {
        let layout = RecordLayout::new(capacity, record_size)?;
        let region =
            MemoryRegion::create(path.as_ref(), capacity).map_err(|source| BusError::Io {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        Ok(Self::init(region, layout))
    }

    /// Opens or creates according to `cfg.append`.
    pub fn from_config(cfg: &BusConfig) -> Result<Self, BusError> {
        if cfg.append {
            Self::open(&cfg.path, cfg.capacity, cfg.record_size)
        } else {
            Self::create(&cfg.path, cfg.capacity, cfg.record_size)
        }
    }

    fn init(region: MemoryRegion, layout: RecordLayout) -> Self {
        // Exactly one opener across all processes moves the tail off zero;
        // everyone else's CAS fails and leaves the tail alone.
        let initialized = region.compare_and_swap_i64(TAIL_OFFSET, 0, DATA_OFFSET as i64);
        debug!(
            path = %region.path().display(),
            capacity = layout.capacity(),
            record_size = layout.record_size(),
            tail = region.load_volatile_i64(TAIL_OFFSET),
            initialized,
            "bus writer opened"
        );
        Self { region, layout }
    }

    /// Writes and publishes a typed message.
    ///
    /// Returns `Ok(false)` if a reader rolled the slot back before it could be
    /// committed; the record is lost and must not be retried into the same
    /// slot.
    #[inline]
    pub fn write<M: BusMessage + ?Sized>(&self, message: &M) -> Result<bool, BusError> {
        let pending = self.write_record(message)?;
        Ok(self.commit(pending))
    }

    /// Writes and publishes a raw byte record of at most `record_size` bytes.
    ///
    /// Returns `Ok(false)` on a lost commit, as for [`write`](Self::write).
    #[inline]
    pub fn write_buffer(&self, src: &[u8]) -> Result<bool, BusError> {
        let pending = self.write_buffer_record(src)?;
        Ok(self.commit(pending))
    }

    /// Allocates a slot and encodes `message` into it without publishing.
    ///
    /// A message longer than `record_size` is rejected before anything is
    /// allocated; encoding it would spill into the next slot's header.
    pub fn write_record<M: BusMessage + ?Sized>(
        &self,
        message: &M,
    ) -> Result<PendingCommit, BusError> {
        self.check_len(message.encoded_len())?;
        let slot = self.allocate()?;
        self.region
            .store_i32(RecordLayout::metadata_offset(slot), message.type_tag());
        message.encode(&self.region, RecordLayout::payload_offset(slot));
        Ok(PendingCommit { slot })
    }

    /// Allocates a slot and copies `src` into it without publishing.
    ///
    /// Oversized input is rejected before anything is allocated.
    pub fn write_buffer_record(&self, src: &[u8]) -> Result<PendingCommit, BusError> {
        self.check_len(src.len())?;
        let slot = self.allocate()?;
        // record_size <= i32::MAX is enforced by RecordLayout
        self.region
            .store_i32(RecordLayout::metadata_offset(slot), src.len() as i32);
        self.region
            .copy_in(RecordLayout::payload_offset(slot), src);
        Ok(PendingCommit { slot })
    }

    /// Publishes a pending slot. Returns `false` if a reader rolled it back
    /// first.
    #[inline]
    pub fn commit(&self, pending: PendingCommit) -> bool {
        let committed = self.region.compare_and_swap_i32(
            RecordLayout::status_offset(pending.slot),
            StatusFlag::NotSet.raw(),
            StatusFlag::Commit.raw(),
        );
        if !committed {
            warn!(offset = pending.slot, "commit lost: slot already rolled back");
        }
        committed
    }

    #[inline(always)]
    fn check_len(&self, len: usize) -> Result<(), BusError> {
        if len > self.layout.record_size() {
            return Err(BusError::RecordTooLarge {
                len,
                record_size: self.layout.record_size(),
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn allocate(&self) -> Result<usize, BusError> {
        let stride = self.layout.entry_size();
        let old = self.region.fetch_add_i64(TAIL_OFFSET, stride as i64);
        // The counter has moved even on failure: once past capacity the bus is
        // full for every writer, so there is nothing to give back.
        let slot = usize::try_from(old).map_err(|_| BusError::EndOfFile { offset: 0 })?;
        if !self.layout.fits(slot) {
            return Err(BusError::EndOfFile { offset: slot });
        }
        Ok(slot)
    }

    /// Current tail: offset one past the last allocated slot.
    pub fn tail(&self) -> usize {
        self.region.load_volatile_i64(TAIL_OFFSET).max(0) as usize
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Unmaps the file.
    pub fn close(self) {
        self.region.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::entry_size;

    const RECORD_SIZE: usize = 12;

    fn test_path(name: &str) -> String {
        let pid = std::process::id();
        format!("/tmp/basalt_writer_{name}_{pid}")
    }

    #[test]
    fn open_initializes_tail_once() {
        let path = test_path("init");
        let first = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
        assert_eq!(first.tail(), DATA_OFFSET);

        first.write_buffer(&[1, 2, 3]).unwrap();
        let late = BusWriter::open(&path, 1000, RECORD_SIZE).unwrap();
        assert_eq!(late.tail(), DATA_OFFSET + entry_size(RECORD_SIZE));

        drop(first);
        drop(late);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_starts_fresh() {
        let path = test_path("fresh");
        {
            let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
            w.write_buffer(&[1]).unwrap();
            w.write_buffer(&[2]).unwrap();
        }
        let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
        assert_eq!(w.tail(), DATA_OFFSET);
        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_advances_tail_by_stride() {
        let path = test_path("stride");
        let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();

        assert!(w.write_buffer(&[0, 1, 2, 3]).unwrap());
        assert_eq!(w.tail(), DATA_OFFSET + entry_size(RECORD_SIZE));
        assert!(w.write_buffer(&[4, 5, 6]).unwrap());
        assert_eq!(w.tail(), DATA_OFFSET + 2 * entry_size(RECORD_SIZE));

        let status = w.region.load_volatile_i32(DATA_OFFSET);
        assert_eq!(status, StatusFlag::Commit.raw());
        assert_eq!(w.region.load_i32(DATA_OFFSET + 4), 4);

        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_past_capacity_is_end_of_file() {
        let path = test_path("eof");
        let capacity = DATA_OFFSET + entry_size(RECORD_SIZE) - 4;
        let w = BusWriter::create(&path, capacity, RECORD_SIZE).unwrap();
        let err = w.write_buffer(&[0; RECORD_SIZE]).unwrap_err();
        assert!(matches!(err, BusError::EndOfFile { offset: DATA_OFFSET }));
        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_write_past_capacity_is_end_of_file() {
        let path = test_path("eof2");
        let capacity = DATA_OFFSET + 2 * entry_size(RECORD_SIZE) - 4;
        let w = BusWriter::create(&path, capacity, RECORD_SIZE).unwrap();
        assert!(w.write_buffer(&[0; RECORD_SIZE]).unwrap());
        assert!(matches!(
            w.write_buffer(&[0; RECORD_SIZE]),
            Err(BusError::EndOfFile { .. })
        ));
        // terminal: the tail stays past capacity
        assert!(matches!(
            w.write_buffer(&[0; 1]),
            Err(BusError::EndOfFile { .. })
        ));
        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversized_buffer_is_rejected_before_allocation() {
        let path = test_path("too_large");
        let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
        let err = w.write_buffer(&[0; RECORD_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err,
            BusError::RecordTooLarge {
                len: 13,
                record_size: RECORD_SIZE
            }
        ));
        assert_eq!(w.tail(), DATA_OFFSET);
        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    struct Wide;

    impl BusMessage for Wide {
        fn encode(&self, region: &MemoryRegion, offset: usize) {
            region.copy_in(offset, &[0xff; 16]);
        }

        fn decode(&mut self, _region: &MemoryRegion, _offset: usize) {}

        fn type_tag(&self) -> i32 {
            3
        }

        fn encoded_len(&self) -> usize {
            16
        }
    }

    #[test]
    fn oversized_message_is_rejected_before_allocation() {
        let path = test_path("wide_message");
        let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
        assert!(matches!(
            w.write(&Wide),
            Err(BusError::RecordTooLarge {
                len: 16,
                record_size: RECORD_SIZE
            })
        ));
        assert_eq!(w.tail(), DATA_OFFSET);

        // the slot that would have followed is untouched
        assert!(w.write_buffer(&[1]).unwrap());
        let next = DATA_OFFSET + entry_size(RECORD_SIZE);
        assert_eq!(w.region.load_volatile_i32(next), StatusFlag::NotSet.raw());
        assert_eq!(w.region.load_i32(next + 4), 0);

        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn commit_loses_to_foreign_rollback() {
        let path = test_path("lost_commit");
        let w = BusWriter::create(&path, 1000, RECORD_SIZE).unwrap();
        let pending = w.write_buffer_record(&[7; 4]).unwrap();
        assert_eq!(pending.offset(), DATA_OFFSET);

        assert!(w.region.compare_and_swap_i32(
            pending.offset(),
            StatusFlag::NotSet.raw(),
            StatusFlag::Rollback.raw()
        ));
        assert!(!w.commit(pending));
        assert_eq!(
            w.region.load_volatile_i32(DATA_OFFSET),
            StatusFlag::Rollback.raw()
        );

        drop(w);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_record_size_is_rejected() {
        let path = test_path("geometry");
        assert!(matches!(
            BusWriter::create(&path, 1000, 10),
            Err(BusError::InvalidGeometry(_))
        ));
        let _ = std::fs::remove_file(&path);
    }
}
