//! Binary layout of a bus file.
//!
//! The layout is shared bit-for-bit by every writer and reader mapping the
//! same file, so nothing here may change without breaking existing files.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  tail (8B atomic i64): offset one past the last allocated slot │
//! ├────────────────────────────────────────────────────────────────┤
//! │                        Slot[0]                                 │
//! │  ┌──────────────┬──────────────┬────────────────────────────┐  │
//! │  │ status (4B)  │ metadata (4B)│ payload (record_size B)    │  │
//! │  │ atomic i32   │ type or len  │                            │  │
//! │  └──────────────┴──────────────┴────────────────────────────┘  │
//! ├────────────────────────────────────────────────────────────────┤
//! │                        Slot[1]                                 │
//! ├────────────────────────────────────────────────────────────────┤
//! │                          ...                                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Slot `n` starts at `DATA_OFFSET + n * entry_size(record_size)`.

use crate::error::BusError;

/// Offset of the tail pointer.
pub const TAIL_OFFSET: usize = 0;

/// Size of the file header (just the tail pointer).
pub const FILE_HEADER_SIZE: usize = 8;

/// Offset of the first slot.
pub const DATA_OFFSET: usize = FILE_HEADER_SIZE;

pub const STATUS_FLAG_SIZE: usize = 4;

pub const METADATA_SIZE: usize = 4;

/// Per-slot header: status word followed by metadata word.
pub const RECORD_HEADER_SIZE: usize = STATUS_FLAG_SIZE + METADATA_SIZE;

/// Bytes occupied by one slot holding `record_size` payload bytes.
#[inline(always)]
pub const fn entry_size(record_size: usize) -> usize {
    RECORD_HEADER_SIZE + record_size
}

/// Delivery state of a slot.
///
/// Transitions are one-way: `NotSet -> Commit` or `NotSet -> Rollback`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFlag {
    NotSet = 0,
    Commit = 1,
    Rollback = 2,
}

impl StatusFlag {
    #[inline(always)]
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(StatusFlag::NotSet),
            1 => Some(StatusFlag::Commit),
            2 => Some(StatusFlag::Rollback),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Geometry of one bus instance: declared file capacity and fixed record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    capacity: usize,
    record_size: usize,
}

impl RecordLayout {
    /// Validates and builds a layout.
    ///
    /// The record size must be a non-zero multiple of 4 so that every slot's
    /// status word is 4-byte aligned for native atomics, and the capacity
    /// must hold at least the file header.
    ///
    /// Bus files written by other producers with a record size that is not a
    /// multiple of 4 (for example 10-byte records) have unaligned strides and
    /// cannot be opened; their geometry is rejected here.
    pub fn new(capacity: usize, record_size: usize) -> Result<Self, BusError> {
        if record_size == 0 {
            return Err(BusError::InvalidGeometry("record size must be non-zero"));
        }
        if record_size % STATUS_FLAG_SIZE != 0 {
            return Err(BusError::InvalidGeometry(
                "record size must be a multiple of 4",
            ));
        }
        if record_size > i32::MAX as usize {
            return Err(BusError::InvalidGeometry("record size exceeds i32::MAX"));
        }
        if capacity < DATA_OFFSET {
            return Err(BusError::InvalidGeometry(
                "capacity smaller than the file header",
            ));
        }
        if capacity > i64::MAX as usize {
            return Err(BusError::InvalidGeometry("capacity exceeds i64::MAX"));
        }
        Ok(Self {
            capacity,
            record_size,
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Slot stride in bytes.
    #[inline(always)]
    pub fn entry_size(&self) -> usize {
        entry_size(self.record_size)
    }

    /// Number of whole slots that fit in the declared capacity.
    pub fn slot_count(&self) -> usize {
        (self.capacity - DATA_OFFSET) / self.entry_size()
    }

    /// Whether a whole slot starting at `slot` fits inside the capacity.
    #[inline(always)]
    pub fn fits(&self, slot: usize) -> bool {
        slot.checked_add(self.entry_size())
            .is_some_and(|end| end <= self.capacity)
    }

    #[inline(always)]
    pub fn status_offset(slot: usize) -> usize {
        slot
    }

    #[inline(always)]
    pub fn metadata_offset(slot: usize) -> usize {
        slot + STATUS_FLAG_SIZE
    }

    #[inline(always)]
    pub fn payload_offset(slot: usize) -> usize {
        slot + RECORD_HEADER_SIZE
    }
}
